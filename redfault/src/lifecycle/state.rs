//! Execution phase and the caller-owned execution state.

use redfault_shared::errors::{FaultError, FaultResult};
use serde::{Deserialize, Serialize};

use crate::engine::{ExecutionParameters, ExecutionSnapshot};

/// Life-cycle phase of an execution.
///
/// ```text
/// prepare() → Prepared
/// start()   → Running   (a failed start stays Prepared)
/// stop()    → Stopped   (also from Prepared: never started)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Unprepared,
    Prepared,
    Running,
    Stopped,
}

impl Phase {
    pub fn can_transition_to(&self, target: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, target),
            (Unprepared, Prepared) | (Prepared, Running) | (Prepared, Stopped) | (Running, Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Unprepared => "unprepared",
            Phase::Prepared => "prepared",
            Phase::Running => "running",
            Phase::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable state carried by the caller from prepare through stop.
///
/// `outputs` belongs to the action; `counters` is the last counter snapshot
/// seen, kept so status can still report totals once the execution has
/// left the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "P: Serialize, O: Serialize",
    deserialize = "P: serde::de::DeserializeOwned, O: serde::de::DeserializeOwned + Default"
))]
pub struct ExecutionState<P, O> {
    pub phase: Phase,
    pub params: ExecutionParameters<P>,
    #[serde(default)]
    pub outputs: O,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counters: Option<ExecutionSnapshot>,
}

impl<P, O: Default> ExecutionState<P, O> {
    pub fn new(params: ExecutionParameters<P>) -> Self {
        Self {
            phase: Phase::Unprepared,
            params,
            outputs: O::default(),
            counters: None,
        }
    }
}

impl<P, O> ExecutionState<P, O> {
    /// Move to `target`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, target: Phase) -> FaultResult<()> {
        if !self.phase.can_transition_to(target) {
            return Err(FaultError::InvalidState(format!(
                "execution {} cannot go from {} to {}",
                self.params.key, self.phase, target
            )));
        }
        tracing::trace!(
            execution_key = %self.params.key,
            from = %self.phase,
            to = %target,
            "Phase transition"
        );
        self.phase = target;
        Ok(())
    }
}
