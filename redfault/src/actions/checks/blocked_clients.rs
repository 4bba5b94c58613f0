//! Blocked-clients check.

use async_trait::async_trait;
use redfault_shared::errors::FaultResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Observations, begin};
use crate::actions::common::{clamp, parse_config, sample_info};
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};

#[derive(Debug, Deserialize)]
struct RawConfig {
    max_blocked_clients: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedClientsParams {
    pub max_blocked_clients: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockedClientsOutputs {
    #[serde(flatten)]
    pub observations: Observations,
    pub max_observed: u64,
}

pub struct BlockedClients;

#[async_trait]
impl Action for BlockedClients {
    type Params = BlockedClientsParams;
    type Outputs = BlockedClientsOutputs;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "blocked-clients",
            label: "Blocked Clients",
            kind: ActionKind::Check,
            description: "Fails when too many clients are blocked on list or stream operations",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<BlockedClientsParams> {
        let raw: RawConfig = parse_config("blocked-clients", config)?;
        Ok(BlockedClientsParams {
            max_blocked_clients: clamp(raw.max_blocked_clients, 10, 0, u32::MAX as u64),
        })
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let mut handle = begin(engine, &state.params).await?;
        handle.close().await;
        Ok(StartReport::with_message(Message::info(format!(
            "monitoring blocked clients (max: {})",
            state.params.tunables.max_blocked_clients
        ))))
    }

    async fn status(&self, engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        let outputs = &mut state.outputs;
        let info = match sample_info(engine, &state.params.target, "clients").await {
            Ok(info) => info,
            Err(e) => {
                outputs.observations.unreachable(report, &e);
                return;
            }
        };

        let blocked = info.int("blocked_clients").unwrap_or(0).max(0) as u64;
        outputs.max_observed = outputs.max_observed.max(blocked);
        report.metric("blocked_clients", blocked as f64);

        let max = state.params.tunables.max_blocked_clients;
        let violation = (blocked > max)
            .then(|| format!("blocked clients {} exceeds threshold {}", blocked, max));
        outputs.observations.record(report, violation);
    }
}
