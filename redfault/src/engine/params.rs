//! Immutable per-execution parameters.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::ExecutionKey;
use crate::target::TargetDescriptor;

/// Parameters fixed at prepare time.
///
/// The engine only reads `key`, `target` and `deadline`; `tunables` is the
/// action's own closed parameter struct.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionParameters<P> {
    pub key: ExecutionKey,
    pub target: TargetDescriptor,
    pub deadline: DateTime<Utc>,
    pub tunables: P,
}

impl<P> ExecutionParameters<P> {
    /// New parameters whose window starts now.
    pub fn new(target: TargetDescriptor, duration: Duration, tunables: P) -> Self {
        let key = ExecutionKey::generate(&target);
        let window = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        let deadline = Utc::now()
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key,
            target,
            deadline,
            tunables,
        }
    }

    pub fn is_complete(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }

    /// Time left until the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.remaining_at(Utc::now())
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.deadline - now).to_std().unwrap_or(Duration::ZERO)
    }
}
