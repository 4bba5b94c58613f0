//! Per-action life-cycle protocol.
//!
//! An [`Action`] supplies what is specific to one fault or check: how to
//! validate its parameters, what start does, what status adds. The generic
//! [`Lifecycle`] driver owns the state machine and the engine calls every
//! action shares.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redfault_shared::errors::{FaultError, FaultResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::engine::Engine;
use super::report::{ProgressReport, StartReport, StopReport};
use super::state::{ExecutionState, Phase};
use crate::engine::ExecutionParameters;
use crate::target::TargetDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Injects a fault.
    Attack,
    /// Observes a health signal.
    Check,
}

/// Static description of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionDescriptor {
    pub id: &'static str,
    pub label: &'static str,
    pub kind: ActionKind,
    pub description: &'static str,
}

/// Execution state of action `A`.
pub type StateOf<A> = ExecutionState<<A as Action>::Params, <A as Action>::Outputs>;

/// A fault or check.
#[async_trait]
pub trait Action: Send + Sync + 'static {
    /// Closed, validated tunables.
    type Params: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static;
    /// Observable outputs accumulated across status calls.
    type Outputs: Serialize + DeserializeOwned + Default + Clone + Debug + Send + Sync + 'static;

    fn descriptor(&self) -> ActionDescriptor;

    /// Validate the action's fields of the raw config, applying defaults
    /// and clamps.
    fn prepare(&self, config: &Value) -> FaultResult<Self::Params>;

    /// Begin the effect. Errors leave the execution `Prepared`.
    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport>;

    /// Add action-specific progress. Never fails; problems become messages.
    async fn status(&self, _engine: &Engine, _state: &mut StateOf<Self>, _report: &mut ProgressReport) {}

    /// Extra teardown after the engine halted the execution.
    async fn stop(&self, _engine: &Engine, _state: &mut StateOf<Self>, _report: &mut StopReport) {}
}

/// Read `duration` (milliseconds) from a raw config. Negative values clamp to zero.
pub fn parse_duration(config: &Value) -> FaultResult<Duration> {
    let raw = config
        .get("duration")
        .ok_or_else(|| FaultError::Validation("duration is required".into()))?;

    if let Some(ms) = raw.as_u64() {
        return Ok(Duration::from_millis(ms));
    }
    if let Some(ms) = raw.as_f64() {
        return Ok(Duration::from_millis(ms.max(0.0) as u64));
    }
    Err(FaultError::Validation(format!(
        "duration must be a number of milliseconds, got {}",
        raw
    )))
}

/// State-machine driver for one action.
pub struct Lifecycle<A: Action> {
    action: A,
    engine: Engine,
}

impl<A: Action> Lifecycle<A> {
    pub fn new(action: A, engine: Engine) -> Self {
        Self { action, engine }
    }

    pub fn action(&self) -> &A {
        &self.action
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Validate input and fix the execution key and deadline.
    ///
    /// # Errors
    ///
    /// [`FaultError::Validation`] for a missing target URL, a missing or
    /// malformed duration, or invalid tunables.
    pub fn prepare(&self, config: &Value, target: TargetDescriptor) -> FaultResult<StateOf<A>> {
        let id = self.action.descriptor().id;
        if target.url.trim().is_empty() {
            return Err(FaultError::Validation("target url is required".into()));
        }
        if target.scheme().is_none() {
            return Err(FaultError::Validation(format!(
                "target url '{}' must include a scheme",
                target.identity()
            )));
        }

        let duration = parse_duration(config)?;
        let tunables = self.action.prepare(config)?;
        let mut state = ExecutionState::new(ExecutionParameters::new(target, duration, tunables));
        state.transition(Phase::Prepared)?;

        tracing::info!(
            action = id,
            execution_key = %state.params.key,
            ?duration,
            "Execution prepared"
        );
        Ok(state)
    }

    /// Begin the execution. Only valid once, from `Prepared`.
    pub async fn start(&self, state: &mut StateOf<A>) -> FaultResult<StartReport> {
        if !state.phase.can_transition_to(Phase::Running) {
            return Err(FaultError::InvalidState(format!(
                "start requires a prepared execution, {} is {}",
                state.params.key, state.phase
            )));
        }

        match self.action.start(&self.engine, state).await {
            Ok(report) => {
                state.transition(Phase::Running)?;
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(
                    action = self.action.descriptor().id,
                    execution_key = %state.params.key,
                    error = %e,
                    "Start failed"
                );
                Err(e)
            }
        }
    }

    /// Report progress. Only fails for an execution that was never prepared.
    pub async fn status(&self, state: &mut StateOf<A>) -> FaultResult<ProgressReport> {
        let completed = state.params.is_complete(Utc::now());
        let mut report = ProgressReport::new(completed);

        match state.phase {
            Phase::Unprepared => {
                return Err(FaultError::InvalidState(
                    "status requires a prepared execution".into(),
                ));
            }
            Phase::Prepared => report.info("execution not running"),
            Phase::Stopped => {
                report.completed = true;
                report.info("execution stopped");
                report.counters = state.counters.clone();
            }
            Phase::Running => {
                match self.engine.snapshot(&state.params.key) {
                    Some(snapshot) => state.counters = Some(snapshot),
                    None => {
                        report.completed = true;
                        report.info("execution no longer registered, treating it as finished");
                    }
                }
                if let Some(counters) = &state.counters {
                    if counters.failures > 0 {
                        report.warn(format!(
                            "{} of {} ticks failed, last error: {}",
                            counters.failures,
                            counters.ticks,
                            counters.last_error.as_deref().unwrap_or("unknown")
                        ));
                    }
                }
                report.counters = state.counters.clone();
                self.action.status(&self.engine, state, &mut report).await;
            }
        }
        Ok(report)
    }

    /// Halt and clean up. Idempotent; cleanup problems become warnings.
    pub async fn stop(&self, state: &mut StateOf<A>) -> FaultResult<StopReport> {
        let mut report = StopReport::default();

        match state.phase {
            Phase::Unprepared => {
                return Err(FaultError::InvalidState(
                    "stop requires a prepared execution".into(),
                ));
            }
            Phase::Prepared => {
                report.info("execution never started");
                state.transition(Phase::Stopped)?;
            }
            Phase::Stopped => {
                report.info("execution already stopped");
                report.counters = state.counters.clone();
            }
            Phase::Running => {
                if let Some(halted) = self.engine.halt(&state.params.key).await {
                    if !halted.finished {
                        report.warn(format!(
                            "worker loop did not finish within {:?}",
                            self.engine.options().stop_grace()
                        ));
                    }
                    report.absorb(&halted.cleanup);
                    state.counters = Some(halted.snapshot);
                }
                self.action.stop(&self.engine, state, &mut report).await;
                report.counters = state.counters.clone();
                state.transition(Phase::Stopped)?;

                tracing::info!(
                    action = self.action.descriptor().id,
                    execution_key = %state.params.key,
                    warnings = report.warnings.len(),
                    "Execution stopped"
                );
            }
        }
        Ok(report)
    }
}
