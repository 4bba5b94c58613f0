//! In-memory handle of a live execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redfault_shared::errors::FaultError;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::cleanup::{Cleanup, CleanupReport, NoCleanup};
use super::key::ExecutionKey;

/// Monotonic counters updated by the worker loop.
#[derive(Default)]
struct Counters {
    successes: AtomicU64,
    failures: AtomicU64,
    created: AtomicU64,
    removed: AtomicU64,
}

struct Inner {
    key: ExecutionKey,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    done: CancellationToken,
    counters: Counters,
    last_error: Mutex<Option<String>>,
    loop_report: Mutex<Option<CleanupReport>>,
    cleanup: Arc<dyn Cleanup>,
}

/// Cancellation control and shared counters of one execution.
///
/// Cheap to clone; the registry owns one clone and the worker loop holds
/// another. Counter access never takes the registry lock.
#[derive(Clone)]
pub struct RunningExecution {
    inner: Arc<Inner>,
}

impl RunningExecution {
    pub fn new(key: ExecutionKey) -> Self {
        Self::with_cleanup(key, Arc::new(NoCleanup))
    }

    /// Attach the cleanup step that both the worker loop and stop will run.
    pub fn with_cleanup(key: ExecutionKey, cleanup: Arc<dyn Cleanup>) -> Self {
        Self {
            inner: Arc::new(Inner {
                key,
                started_at: Utc::now(),
                cancel: CancellationToken::new(),
                done: CancellationToken::new(),
                counters: Counters::default(),
                last_error: Mutex::new(None),
                loop_report: Mutex::new(None),
                cleanup,
            }),
        }
    }

    pub fn key(&self) -> &ExecutionKey {
        &self.inner.key
    }

    pub fn cleanup(&self) -> Arc<dyn Cleanup> {
        self.inner.cleanup.clone()
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Request cancellation. Level-triggered: stays set once signalled.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Mark the worker loop as finished (after its cleanup ran).
    pub(crate) fn mark_done(&self) {
        self.inner.done.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.inner.done.is_cancelled()
    }

    /// Wait for the worker loop to finish, at most `grace`.
    ///
    /// Returns `true` if the loop reached its done state in time.
    pub async fn wait_done(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.inner.done.cancelled())
            .await
            .is_ok()
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    pub fn record_success(&self) {
        self.inner.counters.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, error: &FaultError) {
        self.inner.counters.failures.fetch_add(1, Ordering::Relaxed);
        *self.inner.last_error.lock() = Some(error.to_string());
    }

    pub fn add_created(&self, n: u64) {
        self.inner.counters.created.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_removed(&self, n: u64) {
        self.inner.counters.removed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn successes(&self) -> u64 {
        self.inner.counters.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.inner.counters.failures.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    pub(crate) fn set_loop_report(&self, report: CleanupReport) {
        *self.inner.loop_report.lock() = Some(report);
    }

    /// Cleanup report produced when the worker loop exited, if it has.
    pub fn loop_report(&self) -> Option<CleanupReport> {
        self.inner.loop_report.lock().clone()
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> ExecutionSnapshot {
        let counters = &self.inner.counters;
        let successes = counters.successes.load(Ordering::Relaxed);
        let failures = counters.failures.load(Ordering::Relaxed);
        ExecutionSnapshot {
            key: self.inner.key.clone(),
            started_at: self.inner.started_at,
            ticks: successes + failures,
            successes,
            failures,
            created: counters.created.load(Ordering::Relaxed),
            removed: counters.removed.load(Ordering::Relaxed),
            last_error: self.last_error(),
            cancelled: self.is_cancelled(),
            done: self.is_done(),
        }
    }
}

impl std::fmt::Debug for RunningExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningExecution")
            .field("key", &self.inner.key)
            .field("cancelled", &self.is_cancelled())
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

/// Serializable copy of an execution's counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub key: ExecutionKey,
    pub started_at: DateTime<Utc>,
    /// Completed ticks (`successes + failures`).
    pub ticks: u64,
    pub successes: u64,
    pub failures: u64,
    /// Artifacts created on the target.
    pub created: u64,
    /// Artifacts removed from the target.
    pub removed: u64,
    pub last_error: Option<String>,
    pub cancelled: bool,
    pub done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution() -> RunningExecution {
        RunningExecution::new(ExecutionKey::from("t/0#TEST"))
    }

    #[test]
    fn test_counters_and_last_error() {
        let exec = execution();
        exec.record_success();
        exec.record_success();
        exec.record_failure(&FaultError::Target("boom".into()));
        exec.add_created(10);
        exec.add_removed(7);

        let snap = exec.snapshot();
        assert_eq!(snap.ticks, 3);
        assert_eq!(snap.successes, 2);
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.created, 10);
        assert_eq!(snap.removed, 7);
        assert_eq!(
            snap.last_error.as_deref(),
            Some("target operation failed: boom")
        );
    }

    #[test]
    fn test_cancellation_is_level_triggered() {
        let exec = execution();
        let token = exec.cancellation_token();
        assert!(!token.is_cancelled());
        exec.cancel();
        exec.cancel();
        assert!(token.is_cancelled());
        assert!(exec.snapshot().cancelled);
    }

    #[tokio::test]
    async fn test_wait_done_bounded() {
        let exec = execution();
        assert!(!exec.wait_done(Duration::from_millis(20)).await);

        let clone = exec.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            clone.mark_done();
        });
        assert!(exec.wait_done(Duration::from_secs(2)).await);
        assert!(exec.is_done());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let exec = execution();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let exec = exec.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    exec.record_success();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(exec.successes(), 8000);
    }
}
