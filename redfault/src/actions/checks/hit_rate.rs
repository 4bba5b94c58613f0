//! Cache hit-rate check.
//!
//! The rate is computed over the interval since the previous poll. The
//! first poll falls back to the server's cumulative counters, and an
//! interval without lookups counts as a perfect rate.

use async_trait::async_trait;
use redfault_shared::errors::FaultResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Observations, begin};
use crate::actions::common::{clamp_f64, parse_config, sample_info};
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};

#[derive(Debug, Deserialize)]
struct RawConfig {
    min_hit_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitRateParams {
    /// Percent.
    pub min_hit_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitRateOutputs {
    #[serde(flatten)]
    pub observations: Observations,
    pub last_hits: Option<u64>,
    pub last_misses: Option<u64>,
    pub min_observed_rate: f64,
}

impl Default for HitRateOutputs {
    fn default() -> Self {
        Self {
            observations: Observations::default(),
            last_hits: None,
            last_misses: None,
            min_observed_rate: 100.0,
        }
    }
}

impl HitRateOutputs {
    /// Fold in a new counter reading and return the interval's hit rate.
    fn advance(&mut self, hits: u64, misses: u64) -> f64 {
        let (interval_hits, interval_misses) = match (self.last_hits, self.last_misses) {
            (Some(h), Some(m)) => (hits.saturating_sub(h), misses.saturating_sub(m)),
            _ => (hits, misses),
        };
        self.last_hits = Some(hits);
        self.last_misses = Some(misses);

        let total = interval_hits + interval_misses;
        let rate = if total == 0 {
            100.0
        } else {
            interval_hits as f64 / total as f64 * 100.0
        };
        self.min_observed_rate = self.min_observed_rate.min(rate);
        rate
    }
}

pub struct HitRate;

#[async_trait]
impl Action for HitRate {
    type Params = HitRateParams;
    type Outputs = HitRateOutputs;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "hit-rate",
            label: "Cache Hit Rate",
            kind: ActionKind::Check,
            description: "Fails when the keyspace hit rate drops below a threshold",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<HitRateParams> {
        let raw: RawConfig = parse_config("hit-rate", config)?;
        Ok(HitRateParams {
            min_hit_rate: clamp_f64(raw.min_hit_rate, 80.0, 0.0, 100.0),
        })
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let mut handle = begin(engine, &state.params).await?;
        handle.close().await;
        Ok(StartReport::with_message(Message::info(format!(
            "monitoring cache hit rate (min: {:.0}%)",
            state.params.tunables.min_hit_rate
        ))))
    }

    async fn status(&self, engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        let outputs = &mut state.outputs;
        let info = match sample_info(engine, &state.params.target, "stats").await {
            Ok(info) => info,
            Err(e) => {
                outputs.observations.unreachable(report, &e);
                return;
            }
        };

        let hits = info.int("keyspace_hits").unwrap_or(0).max(0) as u64;
        let misses = info.int("keyspace_misses").unwrap_or(0).max(0) as u64;
        let rate = outputs.advance(hits, misses);

        report.metric("hit_rate", rate);
        report.metric("keyspace_hits", hits as f64);
        report.metric("keyspace_misses", misses as f64);

        let min = state.params.tunables.min_hit_rate;
        let violation = (rate < min)
            .then(|| format!("cache hit rate {:.1}% is below threshold {:.0}%", rate, min));
        outputs.observations.record(report, violation);
    }
}
