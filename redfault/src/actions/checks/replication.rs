//! Replication health check.
//!
//! On a replica, lag and link status are evaluated. A master has nothing
//! to lag behind; it reports how many replicas are attached.

use async_trait::async_trait;
use redfault_shared::errors::FaultResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Observations, begin};
use crate::actions::common::{clamp, parse_config, sample_info};
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};
use crate::target::InfoSection;

#[derive(Debug, Deserialize)]
struct RawConfig {
    max_lag_seconds: Option<i64>,
    require_link_up: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationParams {
    pub max_lag_seconds: u64,
    pub require_link_up: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationOutputs {
    #[serde(flatten)]
    pub observations: Observations,
    pub max_observed_lag: u64,
    pub link_down_detected: bool,
}

pub struct Replication;

fn is_replica(info: &InfoSection) -> bool {
    matches!(info.get("role"), Some("slave") | Some("replica"))
}

#[async_trait]
impl Action for Replication {
    type Params = ReplicationParams;
    type Outputs = ReplicationOutputs;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "replication",
            label: "Replication",
            kind: ActionKind::Check,
            description: "Fails when a replica lags behind its master or loses the link",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<ReplicationParams> {
        let raw: RawConfig = parse_config("replication", config)?;
        Ok(ReplicationParams {
            max_lag_seconds: clamp(raw.max_lag_seconds, 10, 0, u32::MAX as u64),
            require_link_up: raw.require_link_up.unwrap_or(true),
        })
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let mut handle = begin(engine, &state.params).await?;
        let role = handle.info("replication").await;
        handle.close().await;

        let tunables = &state.params.tunables;
        let message = match role {
            Ok(info) if !is_replica(&info) => Message::warn(
                "target is a master, not a replica; reporting connected replicas instead",
            ),
            _ => Message::info(format!(
                "monitoring replication lag (max: {} s, require link up: {})",
                tunables.max_lag_seconds, tunables.require_link_up
            )),
        };
        Ok(StartReport::with_message(message))
    }

    async fn status(&self, engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        let outputs = &mut state.outputs;
        let info = match sample_info(engine, &state.params.target, "replication").await {
            Ok(info) => info,
            Err(e) => {
                outputs.observations.unreachable(report, &e);
                return;
            }
        };

        if !is_replica(&info) {
            let replicas = info.int("connected_slaves").unwrap_or(0);
            report.metric("connected_replicas", replicas as f64);
            report.info(format!("master with {} connected replicas", replicas));
            outputs.observations.record(report, None);
            return;
        }

        let tunables = &state.params.tunables;
        let lag = info.int("master_last_io_seconds_ago").unwrap_or(0).max(0) as u64;
        let link = info.get("master_link_status").unwrap_or("unknown");
        outputs.max_observed_lag = outputs.max_observed_lag.max(lag);
        report.metric("replication_lag_seconds", lag as f64);
        report.metric("master_link_up", if link == "up" { 1.0 } else { 0.0 });

        let mut violation = None;
        if tunables.require_link_up && link != "up" {
            outputs.link_down_detected = true;
            violation = Some(format!("master link is {}", link));
        }
        if lag > tunables.max_lag_seconds {
            violation = Some(format!(
                "replication lag {} s exceeds threshold {} s",
                lag, tunables.max_lag_seconds
            ));
        }
        if info.get("master_sync_in_progress") == Some("1") {
            report.info("master sync in progress");
        }
        outputs.observations.record(report, violation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let params = Replication.prepare(&json!({})).unwrap();
        assert_eq!(params.max_lag_seconds, 10);
        assert!(params.require_link_up);
    }

    #[test]
    fn test_role_detection() {
        let mut info = InfoSection::new();
        info.insert("role", "master");
        assert!(!is_replica(&info));
        info.insert("role", "slave");
        assert!(is_replica(&info));
    }
}
