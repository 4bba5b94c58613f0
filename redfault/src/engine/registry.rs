//! Execution registry.
//!
//! Process-wide table of live executions. Constructed once and injected,
//! so tests can build isolated registries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use redfault_shared::errors::{FaultError, FaultResult};

use super::key::ExecutionKey;
use super::running::RunningExecution;

/// Registry of running executions.
///
/// Every operation takes the lock once, so no caller ever observes a
/// partially inserted or removed entry.
#[derive(Clone, Default)]
pub struct ExecutionRegistry {
    executions: Arc<RwLock<HashMap<ExecutionKey, RunningExecution>>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running execution under its key.
    ///
    /// # Errors
    ///
    /// [`FaultError::DuplicateKey`] if the key is already present.
    pub fn register(&self, execution: RunningExecution) -> FaultResult<()> {
        let mut executions = self.executions.write();
        let key = execution.key().clone();
        if executions.contains_key(&key) {
            tracing::error!(execution_key = %key, "Duplicate execution key");
            return Err(FaultError::DuplicateKey(key.to_string()));
        }
        executions.insert(key.clone(), execution);
        tracing::debug!(execution_key = %key, live = executions.len(), "Registered execution");
        Ok(())
    }

    pub fn lookup(&self, key: &ExecutionKey) -> Option<RunningExecution> {
        self.executions.read().get(key).cloned()
    }

    pub fn contains(&self, key: &ExecutionKey) -> bool {
        self.executions.read().contains_key(key)
    }

    /// Remove an entry. Removing an absent key is a no-op.
    pub fn unregister(&self, key: &ExecutionKey) -> Option<RunningExecution> {
        let removed = self.executions.write().remove(key);
        if removed.is_some() {
            tracing::debug!(execution_key = %key, "Unregistered execution");
        }
        removed
    }

    pub fn keys(&self) -> Vec<ExecutionKey> {
        self.executions.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.executions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.read().is_empty()
    }

    /// Signal cancellation to every live execution. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let executions = self.executions.read();
        for execution in executions.values() {
            execution.cancel();
        }
        executions.len()
    }

    /// Cancel everything and wait up to `grace` for each loop to finish
    /// its cleanup.
    ///
    /// Finished executions are removed. A loop still running after the
    /// grace period gets its cleanup run here and stays registered, so a
    /// later stop can find it and clean up once more.
    ///
    /// Returns the number of loops that did not finish in time.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let live: Vec<RunningExecution> = {
            let executions = self.executions.read();
            executions.values().cloned().collect()
        };
        if live.is_empty() {
            return 0;
        }

        tracing::info!(count = live.len(), "Cancelling live executions");
        for execution in &live {
            execution.cancel();
        }

        let waits = live.iter().map(|e| e.wait_done(grace));
        let finished = futures::future::join_all(waits).await;

        let mut stragglers = Vec::new();
        for (execution, done) in live.into_iter().zip(finished) {
            if done {
                self.unregister(execution.key());
            } else {
                stragglers.push(execution);
            }
        }
        if stragglers.is_empty() {
            return 0;
        }

        tracing::warn!(
            stragglers = stragglers.len(),
            "Executions still running at shutdown, cleaning up in place"
        );
        let reports = stragglers.iter().map(|e| {
            let cleanup = e.cleanup();
            async move { cleanup.cleanup().await }
        });
        for (execution, report) in stragglers
            .iter()
            .zip(futures::future::join_all(reports).await)
        {
            if !report.is_clean() {
                tracing::warn!(
                    execution_key = %execution.key(),
                    warnings = ?report.warnings(),
                    "Shutdown cleanup incomplete"
                );
            }
        }
        stragglers.len()
    }
}
