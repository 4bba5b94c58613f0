//! Background save trigger.
//!
//! A fork-heavy snapshot competes with client traffic for memory and CPU.
//! Status reports whether the save has completed by comparing `LASTSAVE`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redfault_shared::errors::{FaultError, FaultResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::common::parse_config;
use crate::engine::NoCleanup;
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};
use crate::target::TargetHandle;

#[derive(Debug, Deserialize)]
struct RawConfig {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BgsaveOutputs {
    pub last_save_before: Option<i64>,
    /// A save was already running, nothing was triggered.
    pub skipped: bool,
    pub completed_at: Option<i64>,
}

pub struct Bgsave;

fn format_unix(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

fn already_running(err: &FaultError) -> bool {
    err.to_string().to_ascii_lowercase().contains("already in progress")
}

/// Returns the server reply, or `None` when a save was already running.
async fn trigger(handle: &mut dyn TargetHandle) -> FaultResult<Option<String>> {
    let persistence = handle.info("persistence").await?;
    if persistence.int("rdb_bgsave_in_progress") == Some(1) {
        return Ok(None);
    }
    match handle.bgsave().await {
        Ok(reply) => Ok(Some(reply)),
        Err(e) if already_running(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Action for Bgsave {
    type Params = ();
    type Outputs = BgsaveOutputs;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "bgsave",
            label: "Background Save",
            kind: ActionKind::Attack,
            description: "Triggers a background save to create fork and I/O pressure",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<()> {
        let _: RawConfig = parse_config("bgsave", config)?;
        Ok(())
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let mut handle = engine.preflight(&state.params.target).await?;
        let result = async {
            let before = handle.last_save().await?;
            let reply = trigger(handle.as_mut()).await?;
            Ok::<_, FaultError>((before, reply))
        }
        .await;
        handle.close().await;
        let (before, reply) = result?;

        engine.launch_idle(&state.params, Arc::new(NoCleanup))?;
        state.outputs.last_save_before = Some(before);

        let message = match reply {
            Some(reply) => {
                tracing::info!(execution_key = %state.params.key, %reply, "Background save triggered");
                Message::info(format!(
                    "triggered background save ({}), last save was at {}",
                    reply,
                    format_unix(before)
                ))
            }
            None => {
                state.outputs.skipped = true;
                Message::warn("a background save is already in progress")
            }
        };
        Ok(StartReport::with_message(message))
    }

    async fn status(&self, engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        if state.outputs.skipped {
            report.info("background save was not triggered");
            return;
        }
        if let Some(at) = state.outputs.completed_at {
            report.info(format!("background save completed at {}", format_unix(at)));
            return;
        }

        let sampled = match engine.connector().open(&state.params.target).await {
            Ok(mut handle) => {
                let result = handle.last_save().await;
                handle.close().await;
                result
            }
            Err(e) => Err(e),
        };
        match sampled {
            Ok(now) if Some(now) > state.outputs.last_save_before => {
                state.outputs.completed_at = Some(now);
                report.info(format!("background save completed at {}", format_unix(now)));
            }
            Ok(_) => report.info("background save in progress"),
            Err(e) => report.warn(format!("could not read last save time: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_running_detection() {
        assert!(already_running(&FaultError::Target(
            "ERR Background save already in progress".into()
        )));
        assert!(!already_running(&FaultError::Target("ERR unknown".into())));
    }

    #[test]
    fn test_format_unix() {
        assert_eq!(format_unix(0), "1970-01-01T00:00:00+00:00");
    }
}
