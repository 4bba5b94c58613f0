//! Connected-clients check.

use async_trait::async_trait;
use redfault_shared::errors::FaultResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Observations, begin};
use crate::actions::common::{clamp, clamp_f64, parse_config};
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};
use crate::target::TargetHandle;

#[derive(Debug, Deserialize)]
struct RawConfig {
    max_connections: Option<i64>,
    max_connections_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionsParams {
    /// Absolute ceiling. 0 disables.
    pub max_connections: u64,
    /// Percent of `maxclients`. 0 disables.
    pub max_connections_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionsOutputs {
    #[serde(flatten)]
    pub observations: Observations,
    pub max_observed: u64,
}

pub struct Connections;

fn evaluate(params: &ConnectionsParams, connected: u64, max_clients: u64) -> Option<String> {
    let mut violation = None;
    if params.max_connections_percent > 0.0 && max_clients > 0 {
        let percent = connected as f64 / max_clients as f64 * 100.0;
        if percent > params.max_connections_percent {
            violation = Some(format!(
                "connection usage {:.1}% exceeds threshold {:.1}%",
                percent, params.max_connections_percent
            ));
        }
    }
    if params.max_connections > 0 && connected > params.max_connections {
        violation = Some(format!(
            "connected clients {} exceeds threshold {}",
            connected, params.max_connections
        ));
    }
    violation
}

/// `(connected_clients, maxclients)`. Older servers only expose the limit
/// through `CONFIG GET`.
async fn sample(handle: &mut dyn TargetHandle) -> FaultResult<(u64, u64)> {
    let info = handle.info("clients").await?;
    let connected = info.int("connected_clients").unwrap_or(0).max(0) as u64;
    let max_clients = match info.int("maxclients") {
        Some(v) => v.max(0) as u64,
        None => handle
            .config_get("maxclients")
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    };
    Ok((connected, max_clients))
}

#[async_trait]
impl Action for Connections {
    type Params = ConnectionsParams;
    type Outputs = ConnectionsOutputs;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "connections",
            label: "Connections",
            kind: ActionKind::Check,
            description: "Fails when connected clients exceed an absolute count or a share of maxclients",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<ConnectionsParams> {
        let raw: RawConfig = parse_config("connections", config)?;
        Ok(ConnectionsParams {
            max_connections: clamp(raw.max_connections, 0, 0, u32::MAX as u64),
            max_connections_percent: clamp_f64(raw.max_connections_percent, 80.0, 0.0, 100.0),
        })
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let mut handle = begin(engine, &state.params).await?;
        handle.close().await;
        let tunables = &state.params.tunables;
        Ok(StartReport::with_message(Message::info(format!(
            "monitoring connections (max: {}, {}% of maxclients)",
            tunables.max_connections, tunables.max_connections_percent
        ))))
    }

    async fn status(&self, engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        let outputs = &mut state.outputs;
        let sampled = match engine.connector().open(&state.params.target).await {
            Ok(mut handle) => {
                let sampled = sample(handle.as_mut()).await;
                handle.close().await;
                sampled
            }
            Err(e) => Err(e),
        };
        let (connected, max_clients) = match sampled {
            Ok(sampled) => sampled,
            Err(e) => {
                outputs.observations.unreachable(report, &e);
                return;
            }
        };

        outputs.max_observed = outputs.max_observed.max(connected);
        report.metric("connected_clients", connected as f64);
        if max_clients > 0 {
            report.metric("maxclients", max_clients as f64);
        }
        outputs
            .observations
            .record(report, evaluate(&state.params.tunables, connected, max_clients));
    }
}
