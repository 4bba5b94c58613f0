//! One-shot deletion of matching keys, optionally restored afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use redfault_shared::errors::FaultResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::common::{clamp, parse_config, require};
use crate::engine::{Cleanup, CleanupReport, NoCleanup};
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
    StopReport,
};
use crate::target::{TargetConnector, TargetDescriptor, scan_matching};

#[derive(Debug, Deserialize)]
struct RawConfig {
    pattern: Option<String>,
    max_keys: Option<i64>,
    restore_on_stop: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyDeleteParams {
    pub pattern: String,
    /// 0 deletes every match.
    pub max_keys: u64,
    pub restore_on_stop: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyDeleteOutputs {
    pub matched: u64,
    pub deleted_keys: Vec<String>,
    pub backed_up: u64,
}

pub struct KeyDelete;

/// Writes backed-up values back. Entries that fail stay queued for the
/// next run.
struct KeyRestore {
    connector: Arc<dyn TargetConnector>,
    target: TargetDescriptor,
    pending: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl Cleanup for KeyRestore {
    async fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::new();
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return report;
        }

        let mut handle = match self.connector.open(&self.target).await {
            Ok(handle) => handle,
            Err(e) => {
                report.fail(format!("restore {} keys", pending.len()), e);
                self.pending.lock().extend(pending);
                return report;
            }
        };

        let total = pending.len();
        let mut failed = Vec::new();
        let mut first_error = None;
        for (key, value) in pending {
            if let Err(e) = handle.set(&key, &value).await {
                first_error.get_or_insert_with(|| format!("{}: {}", key, e));
                failed.push((key, value));
            }
        }
        handle.close().await;

        let restored = (total - failed.len()) as u64;
        tracing::info!(restored, total, "Restored deleted keys");
        if failed.is_empty() {
            report.ok(restored);
        } else {
            report.fail(
                "restore keys",
                format!(
                    "{} of {} keys not restored (first: {})",
                    failed.len(),
                    total,
                    first_error.unwrap_or_default()
                ),
            );
            self.pending.lock().extend(failed);
        }
        report
    }
}

#[async_trait]
impl Action for KeyDelete {
    type Params = KeyDeleteParams;
    type Outputs = KeyDeleteOutputs;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "key-delete",
            label: "Key Delete",
            kind: ActionKind::Attack,
            description: "Deletes keys matching a pattern to simulate data loss",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<KeyDeleteParams> {
        let raw: RawConfig = parse_config("key-delete", config)?;
        Ok(KeyDeleteParams {
            pattern: require("pattern", raw.pattern)?,
            max_keys: clamp(raw.max_keys, 0, 0, u32::MAX as u64),
            restore_on_stop: raw.restore_on_stop.unwrap_or(true),
        })
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let tunables = state.params.tunables.clone();
        let mut handle = engine.preflight(&state.params.target).await?;
        let keys = match scan_matching(handle.as_mut(), &tunables.pattern, tunables.max_keys as usize).await {
            Ok(keys) => keys,
            Err(e) => {
                handle.close().await;
                return Err(e);
            }
        };

        let mut report = StartReport::default();
        let mut backups = Vec::new();
        let mut deleted = Vec::with_capacity(keys.len());
        if keys.is_empty() {
            report.messages.push(Message::warn(format!(
                "no keys found matching pattern '{}'",
                tunables.pattern
            )));
        } else {
            if tunables.restore_on_stop {
                for key in &keys {
                    // Only plain string values can be read back.
                    if let Ok(Some(value)) = handle.get(key).await {
                        backups.push((key.clone(), value));
                    }
                }
            }
            for key in &keys {
                match handle.delete(key).await {
                    Ok(_) => deleted.push(key.clone()),
                    Err(e) => tracing::warn!(key = %key, error = %e, "Failed to delete key"),
                }
            }
            report.messages.push(Message::info(format!(
                "deleted {} keys matching pattern '{}'",
                deleted.len(),
                tunables.pattern
            )));
        }
        handle.close().await;

        let backed_up = backups.len() as u64;
        let cleanup: Arc<dyn Cleanup> = if tunables.restore_on_stop {
            Arc::new(KeyRestore {
                connector: engine.connector(),
                target: state.params.target.clone(),
                pending: Mutex::new(backups),
            })
        } else {
            Arc::new(NoCleanup)
        };
        let execution = match engine.launch_idle(&state.params, cleanup.clone()) {
            Ok(execution) => execution,
            Err(e) => {
                cleanup.cleanup().await;
                return Err(e);
            }
        };
        execution.add_removed(deleted.len() as u64);

        state.outputs.matched = keys.len() as u64;
        state.outputs.deleted_keys = deleted;
        state.outputs.backed_up = backed_up;
        Ok(report)
    }

    async fn status(&self, _engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        report.metric("keys_deleted", state.outputs.deleted_keys.len() as f64);
        report.info(format!(
            "deleted {} keys matching pattern '{}'",
            state.outputs.deleted_keys.len(),
            state.params.tunables.pattern
        ));
    }

    async fn stop(&self, engine: &Engine, state: &mut StateOf<Self>, report: &mut StopReport) {
        let deleted = state.outputs.deleted_keys.len();
        if !state.params.tunables.restore_on_stop || state.outputs.backed_up == 0 {
            report.info(format!("key delete finished, {} keys were deleted", deleted));
            return;
        }

        let present = match engine.connector().open(&state.params.target).await {
            Ok(mut handle) => {
                let mut present = 0u64;
                for key in &state.outputs.deleted_keys {
                    if let Ok(Some(_)) = handle.get(key).await {
                        present += 1;
                    }
                }
                handle.close().await;
                present
            }
            Err(e) => {
                report.warn(format!("could not verify restored keys: {}", e));
                return;
            }
        };
        report.info(format!(
            "restored {} of {} deleted keys",
            present, state.outputs.backed_up
        ));
    }
}
