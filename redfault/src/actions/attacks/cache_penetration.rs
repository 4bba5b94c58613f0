//! Cache penetration flood.
//!
//! A pool of workers issues lookups for keys that never exist, driving the
//! miss rate up and pushing load onto whatever sits behind the cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redfault_shared::errors::FaultResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::common::{clamp, parse_config};
use crate::engine::{NoCleanup, Tick, TickContext, TickOutcome};
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};
use crate::target::TargetHandle;

#[derive(Debug, Deserialize)]
struct RawConfig {
    concurrency: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePenetrationParams {
    pub concurrency: u64,
}

pub struct CachePenetration;

/// One pooled worker. Keeps its own handle across ticks and reopens it
/// after a failure.
struct MissingLookup {
    prefix: String,
    handle: Option<Box<dyn TargetHandle>>,
    seq: u64,
}

#[async_trait]
impl Tick for MissingLookup {
    async fn tick(&mut self, ctx: &TickContext) -> FaultResult<TickOutcome> {
        let handle = match self.handle.as_mut() {
            Some(handle) => handle,
            None => self.handle.insert(ctx.open().await?),
        };

        let key = format!("{}{}-{}", self.prefix, ctx.worker(), self.seq);
        self.seq += 1;
        if let Err(e) = handle.get(&key).await {
            if let Some(mut broken) = self.handle.take() {
                broken.close().await;
            }
            return Err(e);
        }
        Ok(TickOutcome::Continue)
    }

    async fn finish(&mut self, _ctx: &TickContext) {
        if let Some(mut handle) = self.handle.take() {
            handle.close().await;
        }
    }
}

#[async_trait]
impl Action for CachePenetration {
    type Params = CachePenetrationParams;
    type Outputs = ();

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "cache-penetration",
            label: "Cache Penetration",
            kind: ActionKind::Attack,
            description: "Floods the target with lookups of keys that do not exist",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<CachePenetrationParams> {
        let raw: RawConfig = parse_config("cache-penetration", config)?;
        Ok(CachePenetrationParams {
            concurrency: clamp(raw.concurrency, 10, 1, 1000),
        })
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let mut handle = engine.preflight(&state.params.target).await?;
        handle.close().await;

        let prefix = state.params.key.artifact_prefix("miss");
        let concurrency = state.params.tunables.concurrency;
        let workers = (0..concurrency)
            .map(|_| MissingLookup {
                prefix: prefix.clone(),
                handle: None,
                seq: 0,
            })
            .collect();
        engine.launch(&state.params, workers, Duration::ZERO, Arc::new(NoCleanup))?;

        Ok(StartReport::with_message(Message::info(format!(
            "issuing lookups of missing keys from {} workers",
            concurrency
        ))))
    }

    async fn status(&self, _engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        if let Some(counters) = &state.counters {
            report.metric("requests", counters.successes as f64);
            let elapsed = (chrono::Utc::now() - counters.started_at)
                .to_std()
                .unwrap_or_default()
                .as_secs_f64();
            if elapsed > 0.0 {
                report.metric("requests_per_second", counters.successes as f64 / elapsed);
            }
        }
    }
}
