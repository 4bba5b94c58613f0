//! Client connection exhaustion.
//!
//! Start opens many single connections and keeps them; a worker loop pings
//! them periodically so the target does not time them out. Stop closes them.

use std::sync::Arc;

use async_trait::async_trait;
use redfault_shared::errors::{FaultError, FaultResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::common::{clamp, parse_config, sample_info};
use crate::engine::{Cleanup, HeldHandles, ReleaseHandles, Tick, TickContext, TickOutcome};
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};
use crate::target::TargetHandle;

/// Consecutive open failures tolerated once at least one connection is held.
const MAX_OPEN_FAILURES: u64 = 5;

#[derive(Debug, Deserialize)]
struct RawConfig {
    num_connections: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionExhaustionParams {
    pub num_connections: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionExhaustionOutputs {
    pub opened: u64,
    pub failed_opens: u64,
}

pub struct ConnectionExhaustion;

/// Pings every held connection and drops the ones that stopped answering.
struct Keepalive {
    handles: HeldHandles,
}

/// Handles taken out of the shared pool for one round of pings. Whatever
/// is still checked out goes back when the round ends, including when the
/// tick is abandoned, so the release step always sees it.
struct Checkout {
    pool: HeldHandles,
    handles: Vec<Box<dyn TargetHandle>>,
}

impl Checkout {
    fn take(pool: &HeldHandles) -> Self {
        let handles = pool.lock().drain(..).collect();
        Self {
            pool: pool.clone(),
            handles,
        }
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        self.pool.lock().append(&mut self.handles);
    }
}

#[async_trait]
impl Tick for Keepalive {
    async fn tick(&mut self, ctx: &TickContext) -> FaultResult<TickOutcome> {
        let mut round = Checkout::take(&self.handles);
        if round.handles.is_empty() {
            return Err(FaultError::Target("no connections left to keep alive".into()));
        }

        let before = round.handles.len();
        let mut last_error = None;
        let mut index = 0;
        while index < round.handles.len() {
            match round.handles[index].probe().await {
                Ok(_) => index += 1,
                Err(e) => {
                    let mut dead = round.handles.swap_remove(index);
                    dead.close().await;
                    last_error = Some(e);
                }
            }
            if ctx.is_cancelled() {
                break;
            }
        }

        let alive = round.handles.len();
        let dropped = (before - alive) as u64;
        if dropped > 0 {
            tracing::debug!(
                execution_key = %ctx.execution().key(),
                dropped,
                remaining = alive,
                "Dropped dead connections"
            );
            ctx.execution().add_removed(dropped);
        }
        drop(round);

        match last_error {
            Some(e) if alive == 0 => Err(e),
            _ => Ok(TickOutcome::Continue),
        }
    }
}

#[async_trait]
impl Action for ConnectionExhaustion {
    type Params = ConnectionExhaustionParams;
    type Outputs = ConnectionExhaustionOutputs;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "connection-exhaustion",
            label: "Connection Exhaustion",
            kind: ActionKind::Attack,
            description: "Opens and holds many client connections to exhaust the connection limit",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<ConnectionExhaustionParams> {
        let raw: RawConfig = parse_config("connection-exhaustion", config)?;
        Ok(ConnectionExhaustionParams {
            num_connections: clamp(raw.num_connections, 100, 1, 10_000),
        })
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let target = state.params.target.clone();
        let mut probe = engine.preflight(&target).await?;
        probe.close().await;

        let connector = engine.connector();
        let wanted = state.params.tunables.num_connections;
        let mut held = Vec::with_capacity(wanted as usize);
        let mut failed = 0u64;
        let mut last_error = None;
        for index in 0..wanted {
            let opened = match connector.open(&target).await {
                Ok(mut handle) => match handle.probe().await {
                    Ok(_) => Ok(handle),
                    Err(e) => {
                        handle.close().await;
                        Err(e)
                    }
                },
                Err(e) => Err(e),
            };
            match opened {
                Ok(handle) => held.push(handle),
                Err(e) => {
                    tracing::debug!(index, error = %e, "Failed to open connection");
                    failed += 1;
                    last_error = Some(e);
                    if failed > MAX_OPEN_FAILURES && !held.is_empty() {
                        break;
                    }
                }
            }
        }

        if held.is_empty() {
            return Err(FaultError::UnreachableTarget(format!(
                "failed to open any of {} connections: {}",
                wanted,
                last_error.map(|e| e.to_string()).unwrap_or_default()
            )));
        }

        let opened = held.len() as u64;
        let handles: HeldHandles = Arc::new(parking_lot::Mutex::new(held));
        let release = Arc::new(ReleaseHandles::new(handles.clone()));
        let tick = Keepalive {
            handles: handles.clone(),
        };
        let execution = match engine.launch(
            &state.params,
            vec![tick],
            engine.options().keepalive_interval(),
            release.clone(),
        ) {
            Ok(execution) => execution,
            Err(e) => {
                release.cleanup().await;
                return Err(e);
            }
        };
        execution.add_created(opened);

        state.outputs.opened = opened;
        state.outputs.failed_opens = failed;

        let mut report = StartReport::with_message(Message::info(format!(
            "holding {} of {} connections",
            opened, wanted
        )));
        if failed > 0 {
            report.messages.push(Message::warn(format!(
                "failed to open {} connections, the connection limit may be reached",
                failed
            )));
        }
        Ok(report)
    }

    async fn status(&self, engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        if let Some(counters) = &state.counters {
            report.metric("connections_held", counters.created.saturating_sub(counters.removed) as f64);
        }
        match sample_info(engine, &state.params.target, "clients").await {
            Ok(info) => {
                if let Some(clients) = info.int("connected_clients") {
                    report.metric("connected_clients", clients as f64);
                }
            }
            Err(e) => {
                tracing::debug!(execution_key = %state.params.key, error = %e, "Client info unavailable");
            }
        }
    }
}
