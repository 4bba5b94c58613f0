//! Lowered memory ceiling.
//!
//! Start captures the current `maxmemory` and eviction policy, then applies
//! the requested values. The originals are written back when the window
//! closes or on stop.

use std::sync::Arc;

use async_trait::async_trait;
use redfault_shared::constants::config::{KEEP_SENTINEL, MAXMEMORY, MAXMEMORY_POLICY};
use redfault_shared::errors::{FaultError, FaultResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::common::{parse_config, require, sample_info};
use crate::engine::{Cleanup, ConfigField, ConfigRestore};
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};
use crate::target::TargetHandle;

const DEFAULT_POLICY: &str = "noeviction";

#[derive(Debug, Deserialize)]
struct RawConfig {
    maxmemory: Option<String>,
    eviction_policy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxmemoryLimitParams {
    /// Value handed to `CONFIG SET maxmemory`, e.g. `64mb`.
    pub maxmemory: String,
    /// Eviction policy to apply, or `keep` to leave it untouched.
    pub eviction_policy: String,
}

impl MaxmemoryLimitParams {
    fn keeps_policy(&self) -> bool {
        self.eviction_policy == KEEP_SENTINEL
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaxmemoryLimitOutputs {
    pub original_maxmemory: Option<String>,
    pub original_policy: Option<String>,
}

pub struct MaxmemoryLimit;

/// Apply the new limit and policy. A rejected policy rolls the limit back.
async fn apply(
    handle: &mut dyn TargetHandle,
    params: &MaxmemoryLimitParams,
    original_maxmemory: Option<&str>,
) -> FaultResult<()> {
    handle.config_set(MAXMEMORY, &params.maxmemory).await?;
    if params.keeps_policy() {
        return Ok(());
    }
    if let Err(e) = handle.config_set(MAXMEMORY_POLICY, &params.eviction_policy).await {
        if let Some(original) = original_maxmemory
            && let Err(rollback) = handle.config_set(MAXMEMORY, original).await
        {
            tracing::warn!(error = %rollback, "Failed to roll back maxmemory");
        }
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl Action for MaxmemoryLimit {
    type Params = MaxmemoryLimitParams;
    type Outputs = MaxmemoryLimitOutputs;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "maxmemory-limit",
            label: "Maxmemory Limit",
            kind: ActionKind::Attack,
            description: "Lowers the memory ceiling and eviction policy to force evictions or OOM errors",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<MaxmemoryLimitParams> {
        let raw: RawConfig = parse_config("maxmemory-limit", config)?;
        let eviction_policy = raw
            .eviction_policy
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_POLICY.to_string());
        Ok(MaxmemoryLimitParams {
            maxmemory: require("maxmemory", raw.maxmemory)?,
            eviction_policy,
        })
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let mut handle = engine.preflight(&state.params.target).await?;
        let result = async {
            let maxmemory = handle.config_get(MAXMEMORY).await?;
            let policy = handle.config_get(MAXMEMORY_POLICY).await?;
            tracing::info!(
                execution_key = %state.params.key,
                original_maxmemory = maxmemory.as_deref().unwrap_or(""),
                original_policy = policy.as_deref().unwrap_or(""),
                maxmemory = %state.params.tunables.maxmemory,
                policy = %state.params.tunables.eviction_policy,
                "Applying maxmemory limit"
            );
            apply(handle.as_mut(), &state.params.tunables, maxmemory.as_deref()).await?;
            Ok::<_, FaultError>((maxmemory, policy))
        }
        .await;
        handle.close().await;
        let (maxmemory, policy) = result?;

        let tunables = &state.params.tunables;
        let fields = vec![
            ConfigField::new(MAXMEMORY, maxmemory.clone()),
            ConfigField::new(
                MAXMEMORY_POLICY,
                if tunables.keeps_policy() {
                    None
                } else {
                    policy.clone()
                },
            ),
        ];
        let restore = Arc::new(ConfigRestore::new(
            engine.connector(),
            state.params.target.clone(),
            fields,
        ));
        if let Err(e) = engine.launch_idle(&state.params, restore.clone()) {
            restore.cleanup().await;
            return Err(e);
        }

        let policy_text = if tunables.keeps_policy() {
            format!("{} (unchanged)", policy.as_deref().unwrap_or("unknown"))
        } else {
            tunables.eviction_policy.clone()
        };
        let message = format!(
            "set maxmemory to {} (was: {}), policy: {}",
            tunables.maxmemory,
            maxmemory.as_deref().unwrap_or("unknown"),
            policy_text
        );
        state.outputs.original_maxmemory = maxmemory;
        state.outputs.original_policy = policy;
        Ok(StartReport::with_message(Message::info(message)))
    }

    async fn status(&self, engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        match sample_info(engine, &state.params.target, "memory").await {
            Ok(info) => {
                if let Some(used) = info.int("used_memory") {
                    report.metric("used_memory", used as f64);
                }
                report.info(format!(
                    "maxmemory limit active: {}, current usage: {}",
                    state.params.tunables.maxmemory,
                    info.get("used_memory_human")
                        .or(info.get("used_memory"))
                        .unwrap_or("unknown")
                ));
            }
            Err(e) => report.warn(format!("memory usage unavailable: {}", e)),
        }
    }
}
