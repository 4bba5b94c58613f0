//! Best-effort reconciliation of the target after an execution.
//!
//! Every step here is idempotent: the worker loop runs cleanup when it
//! exits and stop runs it again. Failures are collected per step into a
//! [`CleanupReport`] and never escalated.

use std::sync::Arc;

use async_trait::async_trait;
use redfault_shared::constants::config::KEEP_SENTINEL;
use thiserror::Error;
use parking_lot::Mutex;

use crate::target::{TargetConnector, TargetDescriptor, TargetHandle, scan_matching};

/// One failed cleanup step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{step}: {message}")]
pub struct CleanupError {
    pub step: String,
    pub message: String,
}

impl CleanupError {
    pub fn new(step: impl Into<String>, message: impl ToString) -> Self {
        Self {
            step: step.into(),
            message: message.to_string(),
        }
    }
}

/// Outcome of every cleanup step, in execution order.
///
/// `Ok(n)` carries the number of artifacts the step removed or restored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    outcomes: Vec<Result<u64, CleanupError>>,
}

impl CleanupReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: Result<u64, CleanupError>) {
        if let Err(e) = &outcome {
            tracing::warn!(step = %e.step, error = %e.message, "Cleanup step failed");
        }
        self.outcomes.push(outcome);
    }

    pub fn ok(&mut self, affected: u64) {
        self.record(Ok(affected));
    }

    pub fn fail(&mut self, step: impl Into<String>, message: impl ToString) {
        self.record(Err(CleanupError::new(step, message)));
    }

    /// Total artifacts handled by successful steps.
    pub fn affected(&self) -> u64 {
        self.outcomes.iter().filter_map(|o| o.as_ref().ok()).sum()
    }

    pub fn errors(&self) -> impl Iterator<Item = &CleanupError> {
        self.outcomes.iter().filter_map(|o| o.as_ref().err())
    }

    pub fn is_clean(&self) -> bool {
        self.errors().next().is_none()
    }

    /// Failed steps rendered as warning lines.
    pub fn warnings(&self) -> Vec<String> {
        self.errors().map(|e| e.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// A reconciliation step.
#[async_trait]
pub trait Cleanup: Send + Sync {
    /// Run the step. Must be safe to call more than once.
    async fn cleanup(&self) -> CleanupReport;
}

/// Nothing to reconcile.
pub struct NoCleanup;

#[async_trait]
impl Cleanup for NoCleanup {
    async fn cleanup(&self) -> CleanupReport {
        CleanupReport::new()
    }
}

// ============================================================================
// Enumerative cleanup
// ============================================================================

/// Removes every key under an artifact prefix.
///
/// Re-scans the target instead of trusting what the worker loop tracked, so
/// keys left behind by failed per-tick deletes are caught too.
pub struct PrefixSweep {
    connector: Arc<dyn TargetConnector>,
    target: TargetDescriptor,
    prefix: String,
}

impl PrefixSweep {
    pub fn new(
        connector: Arc<dyn TargetConnector>,
        target: TargetDescriptor,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            target,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl Cleanup for PrefixSweep {
    async fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::new();
        let step = format!("sweep {}*", self.prefix);

        let mut handle = match self.connector.open(&self.target).await {
            Ok(handle) => handle,
            Err(e) => {
                report.fail(step, e);
                return report;
            }
        };

        let pattern = format!("{}*", self.prefix);
        match scan_matching(handle.as_mut(), &pattern, 0).await {
            Ok(keys) => {
                let total = keys.len();
                let mut removed = 0u64;
                let mut failed = Vec::new();
                for key in keys {
                    match handle.delete(&key).await {
                        Ok(_) => removed += 1,
                        Err(e) => failed.push(format!("{}: {}", key, e)),
                    }
                }
                if failed.is_empty() {
                    if removed > 0 {
                        tracing::debug!(prefix = %self.prefix, removed, "Swept leftover artifacts");
                    }
                    report.ok(removed);
                } else {
                    report.fail(
                        step,
                        format!(
                            "{} of {} keys not removed (first: {})",
                            failed.len(),
                            total,
                            failed[0]
                        ),
                    );
                }
            }
            Err(e) => report.fail(step, e),
        }

        handle.close().await;
        report
    }
}

// ============================================================================
// Configuration restore
// ============================================================================

/// One configuration parameter and the value it had before the execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigField {
    pub name: String,
    /// `None` or the `keep` sentinel means the field was never changed.
    pub original: Option<String>,
}

impl ConfigField {
    pub fn new(name: impl Into<String>, original: Option<String>) -> Self {
        Self {
            name: name.into(),
            original,
        }
    }

    fn restore_value(&self) -> Option<&str> {
        match self.original.as_deref() {
            Some(KEEP_SENTINEL) | None => None,
            Some(value) => Some(value),
        }
    }
}

/// Re-applies captured configuration values, one field at a time.
pub struct ConfigRestore {
    connector: Arc<dyn TargetConnector>,
    target: TargetDescriptor,
    fields: Vec<ConfigField>,
}

impl ConfigRestore {
    pub fn new(
        connector: Arc<dyn TargetConnector>,
        target: TargetDescriptor,
        fields: Vec<ConfigField>,
    ) -> Self {
        Self {
            connector,
            target,
            fields,
        }
    }
}

#[async_trait]
impl Cleanup for ConfigRestore {
    async fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::new();
        let pending: Vec<(&str, &str)> = self
            .fields
            .iter()
            .filter_map(|f| f.restore_value().map(|v| (f.name.as_str(), v)))
            .collect();
        if pending.is_empty() {
            return report;
        }

        let mut handle = match self.connector.open(&self.target).await {
            Ok(handle) => handle,
            Err(e) => {
                for (name, _) in pending {
                    report.fail(format!("restore {}", name), &e);
                }
                return report;
            }
        };

        for (name, value) in pending {
            match handle.config_set(name, value).await {
                Ok(()) => {
                    tracing::info!(parameter = name, value, "Restored configuration");
                    report.ok(1);
                }
                Err(e) => report.fail(format!("restore {}", name), e),
            }
        }

        handle.close().await;
        report
    }
}

// ============================================================================
// Held handles
// ============================================================================

/// Handles kept open by an execution, shared between its ticks and cleanup.
///
/// The lock is never held across an await: users take handles out, work on
/// them and put them back.
pub type HeldHandles = Arc<Mutex<Vec<Box<dyn TargetHandle>>>>;

/// Closes every held handle. A second run finds nothing to close.
pub struct ReleaseHandles {
    handles: HeldHandles,
}

impl ReleaseHandles {
    pub fn new(handles: HeldHandles) -> Self {
        Self { handles }
    }
}

#[async_trait]
impl Cleanup for ReleaseHandles {
    async fn cleanup(&self) -> CleanupReport {
        let drained: Vec<Box<dyn TargetHandle>> = self.handles.lock().drain(..).collect();
        let count = drained.len() as u64;
        for mut handle in drained {
            handle.close().await;
        }
        if count > 0 {
            tracing::debug!(count, "Released held connections");
        }
        let mut report = CleanupReport::new();
        report.ok(count);
        report
    }
}
