//! Round-trip latency check.

use async_trait::async_trait;
use redfault_shared::errors::FaultResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Observations, begin};
use crate::actions::common::{clamp_f64, parse_config};
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};

#[derive(Debug, Deserialize)]
struct RawConfig {
    max_latency_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyParams {
    pub max_latency_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyOutputs {
    #[serde(flatten)]
    pub observations: Observations,
    pub max_observed_ms: f64,
    pub failed_probes: u64,
}

pub struct Latency;

#[async_trait]
impl Action for Latency {
    type Params = LatencyParams;
    type Outputs = LatencyOutputs;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "latency",
            label: "Latency",
            kind: ActionKind::Check,
            description: "Fails when the PING round trip exceeds a threshold",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<LatencyParams> {
        let raw: RawConfig = parse_config("latency", config)?;
        Ok(LatencyParams {
            max_latency_ms: clamp_f64(raw.max_latency_ms, 100.0, 0.0, f64::MAX),
        })
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let mut handle = begin(engine, &state.params).await?;
        handle.close().await;
        Ok(StartReport::with_message(Message::info(format!(
            "monitoring latency (max: {} ms)",
            state.params.tunables.max_latency_ms
        ))))
    }

    async fn status(&self, engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        let outputs = &mut state.outputs;
        let rtt = match engine.connector().open(&state.params.target).await {
            Ok(mut handle) => {
                let rtt = handle.probe().await;
                handle.close().await;
                rtt
            }
            Err(e) => Err(e),
        };

        let rtt = match rtt {
            Ok(rtt) => rtt,
            Err(e) => {
                outputs.failed_probes += 1;
                outputs.observations.unreachable(report, &e);
                return;
            }
        };

        let latency_ms = rtt.as_secs_f64() * 1000.0;
        outputs.max_observed_ms = outputs.max_observed_ms.max(latency_ms);
        report.metric("latency_ms", latency_ms);
        report.metric("max_observed_latency_ms", outputs.max_observed_ms);

        let max = state.params.tunables.max_latency_ms;
        let violation = (latency_ms > max)
            .then(|| format!("latency {:.2} ms exceeds threshold {:.0} ms", latency_ms, max));
        outputs.observations.record(report, violation);
    }
}
