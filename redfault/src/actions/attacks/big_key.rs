//! Oversized key churn.
//!
//! Each tick writes `num_keys` values of `key_size_mb` MB, holds them, then
//! deletes them. Keys that survive a failed delete are swept by prefix when
//! the execution ends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redfault_shared::constants::timing::CYCLE_PAUSE_MS;
use redfault_shared::errors::FaultResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::common::{MB, clamp, parse_config, random_payload};
use crate::engine::{PrefixSweep, Tick, TickContext, TickOutcome};
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};

const MAX_KEY_SIZE_MB: u64 = 512;

#[derive(Debug, Deserialize)]
struct RawConfig {
    key_size_mb: Option<i64>,
    num_keys: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BigKeyParams {
    pub key_size_mb: u64,
    pub num_keys: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BigKeyOutputs {
    pub prefix: Option<String>,
}

pub struct BigKey;

struct BigKeyCycle {
    prefix: String,
    value: Arc<Vec<u8>>,
    num_keys: u64,
    hold: Duration,
    cycle: u64,
}

#[async_trait]
impl Tick for BigKeyCycle {
    async fn tick(&mut self, ctx: &TickContext) -> FaultResult<TickOutcome> {
        let mut handle = ctx.open().await?;
        let cycle = self.cycle;
        self.cycle += 1;

        let mut written = Vec::with_capacity(self.num_keys as usize);
        let mut write_error = None;
        for i in 0..self.num_keys {
            if ctx.is_cancelled() {
                break;
            }
            let key = format!("{}{}-{}", self.prefix, cycle, i);
            match handle.set(&key, &self.value).await {
                Ok(()) => written.push(key),
                Err(e) => {
                    write_error = Some(e);
                    break;
                }
            }
        }
        ctx.execution().add_created(written.len() as u64);

        if write_error.is_none() {
            ctx.hold(self.hold).await;
        }

        let mut removed = 0;
        for key in &written {
            // Leftovers are swept by prefix at the end.
            if handle.delete(key).await.is_ok() {
                removed += 1;
            }
        }
        ctx.execution().add_removed(removed);
        handle.close().await;

        match write_error {
            Some(e) => Err(e),
            None => Ok(TickOutcome::Continue),
        }
    }
}

#[async_trait]
impl Action for BigKey {
    type Params = BigKeyParams;
    type Outputs = BigKeyOutputs;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "big-key",
            label: "Big Key",
            kind: ActionKind::Attack,
            description: "Repeatedly creates and deletes oversized keys to stress memory and latency",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<BigKeyParams> {
        let raw: RawConfig = parse_config("big-key", config)?;
        Ok(BigKeyParams {
            key_size_mb: clamp(raw.key_size_mb, 10, 1, MAX_KEY_SIZE_MB),
            num_keys: clamp(raw.num_keys, 1, 1, 10_000),
        })
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let prefix = state.params.key.artifact_prefix("big-key");
        let mut handle = engine.preflight(&state.params.target).await?;

        let mut report = StartReport::default();
        let probe_key = format!("{}check", prefix);
        match handle.set(&probe_key, b"1").await {
            Ok(()) => {
                let _ = handle.delete(&probe_key).await;
            }
            Err(e) => report
                .messages
                .push(Message::warn(format!("test write failed, keys may not be created: {}", e))),
        }
        handle.close().await;

        let tunables = &state.params.tunables;
        let tick = BigKeyCycle {
            prefix: prefix.clone(),
            value: Arc::new(random_payload((tunables.key_size_mb * MB) as usize)),
            num_keys: tunables.num_keys,
            hold: engine.options().hold(),
            cycle: 0,
        };
        let sweep = PrefixSweep::new(engine.connector(), state.params.target.clone(), prefix.clone());
        engine.launch(
            &state.params,
            vec![tick],
            Duration::from_millis(CYCLE_PAUSE_MS),
            Arc::new(sweep),
        )?;

        report.messages.push(Message::info(format!(
            "creating {} key(s) of {} MB under {}",
            tunables.num_keys, tunables.key_size_mb, prefix
        )));
        state.outputs.prefix = Some(prefix);
        Ok(report)
    }

    async fn status(&self, _engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        if let Some(counters) = &state.counters {
            report.metric("keys_created", counters.created as f64);
            report.metric("keys_removed", counters.removed as f64);
        }
    }
}
