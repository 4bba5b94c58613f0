//! Gradual memory pressure.
//!
//! Writes values at a fixed rate until the optional cap is reached, then
//! holds what was written until the window closes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redfault_shared::errors::FaultResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::common::{MB, clamp, parse_config, random_payload};
use crate::engine::{PrefixSweep, Tick, TickContext, TickOutcome};
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};

/// Writes are batched into slices of this length.
const SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct RawConfig {
    value_size: Option<i64>,
    fill_rate: Option<i64>,
    max_memory_mb: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFillParams {
    /// Bytes per value.
    pub value_size: u64,
    /// MB written per second.
    pub fill_rate: u64,
    /// Stop writing after this many MB. 0 means no cap.
    pub max_memory_mb: u64,
}

impl MemoryFillParams {
    /// Values written per slice, at least one.
    fn batch(&self) -> u64 {
        let per_second = (self.fill_rate * MB) / self.value_size;
        let slices_per_second = (1000 / SLICE.as_millis()) as u64;
        (per_second / slices_per_second).max(1)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryFillOutputs {
    pub prefix: Option<String>,
}

pub struct MemoryFill;

struct FillSlice {
    prefix: String,
    value: Arc<Vec<u8>>,
    batch: u64,
    cap_bytes: Option<u64>,
    written_bytes: u64,
    seq: u64,
}

#[async_trait]
impl Tick for FillSlice {
    async fn tick(&mut self, ctx: &TickContext) -> FaultResult<TickOutcome> {
        if let Some(cap) = self.cap_bytes {
            if self.written_bytes >= cap {
                tracing::info!(
                    execution_key = %ctx.execution().key(),
                    written_bytes = self.written_bytes,
                    "Memory fill cap reached"
                );
                return Ok(TickOutcome::Settled);
            }
        }

        let mut handle = ctx.open().await?;
        let mut result = Ok(TickOutcome::Continue);
        for _ in 0..self.batch {
            if ctx.is_cancelled() {
                break;
            }
            let key = format!("{}{}", self.prefix, self.seq);
            if let Err(e) = handle.set(&key, &self.value).await {
                result = Err(e);
                break;
            }
            self.seq += 1;
            self.written_bytes += self.value.len() as u64;
            ctx.execution().add_created(1);
            if self.cap_bytes.is_some_and(|cap| self.written_bytes >= cap) {
                break;
            }
        }
        handle.close().await;
        result
    }
}

#[async_trait]
impl Action for MemoryFill {
    type Params = MemoryFillParams;
    type Outputs = MemoryFillOutputs;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "memory-fill",
            label: "Memory Fill",
            kind: ActionKind::Attack,
            description: "Fills memory at a fixed rate to trigger eviction or out-of-memory errors",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<MemoryFillParams> {
        let raw: RawConfig = parse_config("memory-fill", config)?;
        Ok(MemoryFillParams {
            value_size: clamp(raw.value_size, 1024, 1, 512 * MB),
            fill_rate: clamp(raw.fill_rate, 1, 1, 10_240),
            max_memory_mb: clamp(raw.max_memory_mb, 0, 0, u32::MAX as u64),
        })
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let mut handle = engine.preflight(&state.params.target).await?;
        handle.close().await;

        let prefix = state.params.key.artifact_prefix("memory-fill");
        let tunables = &state.params.tunables;
        let tick = FillSlice {
            prefix: prefix.clone(),
            value: Arc::new(random_payload(tunables.value_size as usize)),
            batch: tunables.batch(),
            cap_bytes: (tunables.max_memory_mb > 0).then(|| tunables.max_memory_mb * MB),
            written_bytes: 0,
            seq: 0,
        };
        let sweep = PrefixSweep::new(engine.connector(), state.params.target.clone(), prefix.clone());
        engine.launch(&state.params, vec![tick], SLICE, Arc::new(sweep))?;

        let cap = if tunables.max_memory_mb > 0 {
            format!("up to {} MB", tunables.max_memory_mb)
        } else {
            "without a cap".to_string()
        };
        state.outputs.prefix = Some(prefix);
        Ok(StartReport::with_message(Message::info(format!(
            "filling at {} MB/s {}",
            tunables.fill_rate, cap
        ))))
    }

    async fn status(&self, _engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        if let Some(counters) = &state.counters {
            let written = counters.created * state.params.tunables.value_size;
            report.metric("bytes_written", written as f64);
        }
    }
}
