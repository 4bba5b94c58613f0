//! Background worker loop.
//!
//! One supervisor task per execution runs a pool of one or more tick
//! loops. Each loop calls its [`Tick`] until the execution is cancelled or
//! its deadline passes. When every loop has exited the supervisor runs the
//! execution's cleanup once, stores the report and marks the execution done.
//!
//! Tick errors are counted and backed off, never propagated; a panicking
//! tick is caught by the join and recorded as a failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redfault_shared::errors::{FaultError, FaultResult};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::running::RunningExecution;
use crate::target::{TargetConnector, TargetDescriptor, TargetHandle};

/// What a loop should do after a successful tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep ticking.
    Continue,
    /// The effect is in place; stop ticking but keep it until the window
    /// closes or the execution is cancelled.
    Settled,
}

/// One unit of background work.
///
/// A tick opens whatever it needs and must not rely on state from the
/// previous tick beyond its own fields and the execution counters. A pooled
/// worker may keep one handle across its own ticks; it is released in
/// [`finish`](Tick::finish).
#[async_trait]
pub trait Tick: Send + 'static {
    async fn tick(&mut self, ctx: &TickContext) -> FaultResult<TickOutcome>;

    /// Called once when the loop exits.
    async fn finish(&mut self, _ctx: &TickContext) {}
}

/// Pool element for executions whose effect is applied at start and that
/// only need their cleanup kept pending until the window closes.
pub enum Idle {}

#[async_trait]
impl Tick for Idle {
    async fn tick(&mut self, _ctx: &TickContext) -> FaultResult<TickOutcome> {
        match *self {}
    }
}

/// Timing of a worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Delay after a failed tick.
    pub backoff: Duration,
    /// Delay after a successful tick. Zero yields to the scheduler instead.
    pub pause: Duration,
    /// Upper bound on a single tick.
    pub tick_timeout: Duration,
}

/// Everything a tick can see.
#[derive(Clone)]
pub struct TickContext {
    execution: RunningExecution,
    cancel: CancellationToken,
    deadline: Instant,
    worker: usize,
    connector: Arc<dyn TargetConnector>,
    target: TargetDescriptor,
}

impl TickContext {
    pub fn execution(&self) -> &RunningExecution {
        &self.execution
    }

    /// Index of this loop within its pool.
    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    /// Open a fresh handle to the target.
    pub async fn open(&self) -> FaultResult<Box<dyn TargetHandle>> {
        self.connector.open(&self.target).await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the loop should stop starting new ticks.
    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || Instant::now() >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Keep injected state alive for `duration`, bounded by the deadline.
    ///
    /// Returns `false` if cancellation cut the hold short.
    pub async fn hold(&self, duration: Duration) -> bool {
        let until = std::cmp::min(Instant::now() + duration, self.deadline);
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep_until(until) => true,
        }
    }

    /// Wait until the window closes or the execution is cancelled.
    pub async fn wait_window(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep_until(self.deadline) => {}
        }
    }
}

fn deadline_instant(deadline: DateTime<Utc>) -> Instant {
    let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    let now = Instant::now();
    now.checked_add(remaining)
        // Far enough in the future to never fire.
        .unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 24 * 3600))
}

/// Launch the supervisor for `execution`.
///
/// Returns immediately; the first tick may not have started yet. With an
/// empty `ticks` pool the supervisor simply holds until the window closes,
/// which is how executions whose effect is applied at start keep their
/// cleanup pending.
pub fn spawn_workers<T: Tick>(
    execution: RunningExecution,
    deadline: DateTime<Utc>,
    connector: Arc<dyn TargetConnector>,
    target: TargetDescriptor,
    ticks: Vec<T>,
    options: WorkerOptions,
) -> JoinHandle<()> {
    let deadline = deadline_instant(deadline);
    let cancel = execution.cancellation_token();

    tokio::spawn(async move {
        let key = execution.key().clone();
        let base = TickContext {
            execution: execution.clone(),
            cancel,
            deadline,
            worker: 0,
            connector,
            target,
        };

        if ticks.is_empty() {
            base.wait_window().await;
        } else {
            let pool = ticks.len();
            let mut set = JoinSet::new();
            for (worker, tick) in ticks.into_iter().enumerate() {
                let ctx = TickContext {
                    worker,
                    ..base.clone()
                };
                set.spawn(run_loop(tick, ctx, options));
            }
            tracing::debug!(execution_key = %key, pool, "Worker loops started");

            while let Some(joined) = set.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(execution_key = %key, error = %e, "Worker loop aborted");
                    execution.record_failure(&FaultError::Internal(format!(
                        "worker loop aborted: {}",
                        e
                    )));
                }
            }
        }

        let reason = if execution.is_cancelled() {
            "cancelled"
        } else {
            "deadline"
        };
        let report = execution.cleanup().cleanup().await;
        tracing::info!(
            execution_key = %key,
            reason,
            ticks = execution.successes() + execution.failures(),
            failures = execution.failures(),
            cleanup_warnings = report.warnings().len(),
            "Execution finished"
        );
        execution.set_loop_report(report);
        execution.mark_done();
    })
}

async fn run_loop<T: Tick>(mut tick: T, ctx: TickContext, options: WorkerOptions) {
    loop {
        if ctx.should_stop() {
            break;
        }

        let result = match tokio::time::timeout(options.tick_timeout, tick.tick(&ctx)).await {
            Ok(result) => result,
            Err(_) => Err(FaultError::Target(format!(
                "tick timed out after {:?}",
                options.tick_timeout
            ))),
        };

        match result {
            Ok(TickOutcome::Continue) => {
                ctx.execution.record_success();
                if options.pause.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    ctx.hold(options.pause).await;
                }
            }
            Ok(TickOutcome::Settled) => {
                ctx.execution.record_success();
                ctx.wait_window().await;
                break;
            }
            Err(e) => {
                tracing::warn!(
                    execution_key = %ctx.execution.key(),
                    worker = ctx.worker,
                    error = %e,
                    "Tick failed"
                );
                ctx.execution.record_failure(&e);
                ctx.hold(options.backoff).await;
            }
        }
    }
    tick.finish(&ctx).await;
}
