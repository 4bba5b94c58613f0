//! Makes a Sentinel (or any Redis-protocol node) unresponsive with
//! `DEBUG SLEEP` for the rest of the window.
//!
//! The sleep cannot be cut short, so there is nothing to clean up: the
//! server recovers on its own when the window closes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redfault_shared::errors::{FaultError, FaultResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::common::parse_config;
use crate::engine::NoCleanup;
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};
use crate::target::TargetHandle;

const SENTINEL_MODE: &str = "sentinel";

#[derive(Debug, Deserialize)]
struct RawConfig {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentinelStopOutputs {
    pub sleep_seconds: u64,
    /// `redis_mode` reported by the target, if it could be read.
    pub redis_mode: Option<String>,
}

pub struct SentinelStop;

/// Warn when the target does not look like a Sentinel. Never fails.
async fn verify_mode(handle: &mut dyn TargetHandle) -> (Option<String>, Option<Message>) {
    match handle.info("server").await {
        Ok(info) => {
            let mode = info.get("redis_mode").unwrap_or_default().to_string();
            let warning = (mode != SENTINEL_MODE).then(|| {
                Message::warn(format!(
                    "target reports redis_mode={:?} (expected {:?}), proceeding with DEBUG SLEEP",
                    mode, SENTINEL_MODE
                ))
            });
            (Some(mode), warning)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not verify redis_mode");
            (
                None,
                Some(Message::warn(
                    "could not verify redis_mode (INFO server failed), proceeding with DEBUG SLEEP",
                )),
            )
        }
    }
}

#[async_trait]
impl Action for SentinelStop {
    type Params = ();
    type Outputs = SentinelStopOutputs;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "sentinel-stop",
            label: "Stop Sentinel",
            kind: ActionKind::Attack,
            description: "Blocks the server with DEBUG SLEEP so it stops answering clients and other Sentinels",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<()> {
        let _: RawConfig = parse_config("sentinel-stop", config)?;
        Ok(())
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        // DEBUG SLEEP takes whole seconds; round the window up.
        let seconds = state.params.remaining().as_millis().div_ceil(1000) as u64;
        if seconds == 0 {
            return Err(FaultError::Validation(
                "sleep duration must be greater than zero".into(),
            ));
        }

        let mut handle = engine.preflight(&state.params.target).await?;
        let (mode, warning) = verify_mode(handle.as_mut()).await;
        let slept = handle.debug_sleep(Duration::from_secs(seconds)).await;
        handle.close().await;
        slept?;

        state.outputs.sleep_seconds = seconds;
        state.outputs.redis_mode = mode;
        // The sleep is already in effect and cannot be undone here.
        engine.launch_idle(&state.params, Arc::new(NoCleanup))?;
        tracing::info!(execution_key = %state.params.key, seconds, "Target put to sleep");

        let mut report = StartReport::default();
        report.messages.extend(warning);
        report.messages.push(Message::info(format!(
            "server stopped via DEBUG SLEEP for {} s, it recovers on its own",
            seconds
        )));
        Ok(report)
    }

    async fn status(&self, _engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        if report.completed {
            report.info("sleep completed, the server should be answering again");
        } else {
            report.info(format!(
                "server sleeping, {} s remaining until it recovers",
                state.params.remaining().as_secs()
            ));
        }
    }
}
