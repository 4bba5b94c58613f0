//! Memory usage check.

use async_trait::async_trait;
use redfault_shared::errors::FaultResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Observations, begin};
use crate::actions::common::{MB, clamp, clamp_f64, parse_config, sample_info};
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};

#[derive(Debug, Deserialize)]
struct RawConfig {
    max_memory_percent: Option<f64>,
    max_memory_mb: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryParams {
    /// Percent of `maxmemory`. 0 disables; ignored when no limit is set.
    pub max_memory_percent: f64,
    /// Absolute ceiling. 0 disables.
    pub max_memory_mb: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryOutputs {
    #[serde(flatten)]
    pub observations: Observations,
    pub max_observed_bytes: u64,
}

pub struct Memory;

fn evaluate(params: &MemoryParams, used: u64, limit: u64) -> Option<String> {
    let mut violation = None;
    if params.max_memory_percent > 0.0 && limit > 0 {
        let percent = used as f64 / limit as f64 * 100.0;
        if percent > params.max_memory_percent {
            violation = Some(format!(
                "memory usage {:.1}% exceeds threshold {:.1}%",
                percent, params.max_memory_percent
            ));
        }
    }
    let max_bytes = params.max_memory_mb * MB;
    if max_bytes > 0 && used > max_bytes {
        violation = Some(format!(
            "memory usage {} bytes exceeds threshold {} bytes",
            used, max_bytes
        ));
    }
    violation
}

#[async_trait]
impl Action for Memory {
    type Params = MemoryParams;
    type Outputs = MemoryOutputs;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "memory",
            label: "Memory Usage",
            kind: ActionKind::Check,
            description: "Fails when memory usage exceeds a percentage of maxmemory or an absolute size",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<MemoryParams> {
        let raw: RawConfig = parse_config("memory", config)?;
        Ok(MemoryParams {
            max_memory_percent: clamp_f64(raw.max_memory_percent, 80.0, 0.0, 100.0),
            max_memory_mb: clamp(raw.max_memory_mb, 0, 0, u32::MAX as u64),
        })
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let mut handle = begin(engine, &state.params).await?;
        handle.close().await;
        let tunables = &state.params.tunables;
        Ok(StartReport::with_message(Message::info(format!(
            "monitoring memory usage (max: {}%, {} MB)",
            tunables.max_memory_percent, tunables.max_memory_mb
        ))))
    }

    async fn status(&self, engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        let outputs = &mut state.outputs;
        let info = match sample_info(engine, &state.params.target, "memory").await {
            Ok(info) => info,
            Err(e) => {
                outputs.observations.unreachable(report, &e);
                return;
            }
        };

        let used = info.int("used_memory").unwrap_or(0).max(0) as u64;
        let limit = info.int("maxmemory").unwrap_or(0).max(0) as u64;
        outputs.max_observed_bytes = outputs.max_observed_bytes.max(used);

        report.metric("used_memory", used as f64);
        if limit > 0 {
            report.metric("maxmemory", limit as f64);
            report.metric("memory_usage_percent", used as f64 / limit as f64 * 100.0);
        }
        outputs
            .observations
            .record(report, evaluate(&state.params.tunables, used, limit));
    }
}
