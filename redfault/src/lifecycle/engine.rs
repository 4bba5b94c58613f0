//! The engine service injected into every action.

use std::sync::Arc;
use std::time::Duration;

use redfault_shared::errors::{FaultError, FaultResult};

use crate::config::EngineOptions;
use crate::engine::{
    Cleanup, CleanupReport, ExecutionKey, ExecutionParameters, ExecutionRegistry,
    ExecutionSnapshot, Idle, RunningExecution, Tick, WorkerOptions, spawn_workers,
};
use crate::target::{TargetConnector, TargetDescriptor, TargetHandle};

struct EngineInner {
    registry: ExecutionRegistry,
    connector: Arc<dyn TargetConnector>,
    options: EngineOptions,
}

/// Registry, target connector and timing options bundled as one service.
///
/// Construct once per process (or once per test) and share by cloning.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// What stop learned from halting a running execution.
#[derive(Debug, Clone)]
pub struct Halted {
    /// Counters read after the grace wait. A tick still in flight at that
    /// point may or may not be included.
    pub snapshot: ExecutionSnapshot,
    /// The worker loop reached its done state within the grace period.
    pub finished: bool,
    /// Report of the cleanup run by stop itself.
    pub cleanup: CleanupReport,
}

impl Engine {
    pub fn new(connector: Arc<dyn TargetConnector>, options: EngineOptions) -> Self {
        Self::with_registry(connector, options, ExecutionRegistry::new())
    }

    pub fn with_registry(
        connector: Arc<dyn TargetConnector>,
        options: EngineOptions,
        registry: ExecutionRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                connector,
                options,
            }),
        }
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.inner.registry
    }

    pub fn connector(&self) -> Arc<dyn TargetConnector> {
        self.inner.connector.clone()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    pub fn worker_options(&self, pause: Duration) -> WorkerOptions {
        WorkerOptions {
            backoff: self.inner.options.tick_backoff(),
            pause,
            tick_timeout: self.inner.options.tick_timeout(),
        }
    }

    /// Open a handle and verify the target answers.
    ///
    /// # Errors
    ///
    /// [`FaultError::UnreachableTarget`] when the handle cannot be opened or
    /// the probe fails. Malformed descriptors stay [`FaultError::Validation`].
    pub async fn preflight(&self, target: &TargetDescriptor) -> FaultResult<Box<dyn TargetHandle>> {
        let mut handle = self.inner.connector.open(target).await.map_err(|e| match e {
            FaultError::Validation(_) | FaultError::UnreachableTarget(_) => e,
            other => FaultError::UnreachableTarget(other.to_string()),
        })?;

        match handle.probe().await {
            Ok(rtt) => {
                tracing::debug!(target_identity = %target.identity(), ?rtt, "Pre-flight probe ok");
                Ok(handle)
            }
            Err(e) => {
                handle.close().await;
                tracing::warn!(target_identity = %target.identity(), error = %e, "Pre-flight probe failed");
                Err(match e {
                    FaultError::UnreachableTarget(_) => e,
                    other => FaultError::UnreachableTarget(other.to_string()),
                })
            }
        }
    }

    /// Register an execution and launch its worker loop.
    ///
    /// Returns as soon as the supervisor task is spawned.
    pub fn launch<P, T: Tick>(
        &self,
        params: &ExecutionParameters<P>,
        ticks: Vec<T>,
        pause: Duration,
        cleanup: Arc<dyn Cleanup>,
    ) -> FaultResult<RunningExecution> {
        let execution = RunningExecution::with_cleanup(params.key.clone(), cleanup);
        self.inner.registry.register(execution.clone())?;

        let pool = ticks.len();
        spawn_workers(
            execution.clone(),
            params.deadline,
            self.connector(),
            params.target.clone(),
            ticks,
            self.worker_options(pause),
        );
        tracing::info!(
            execution_key = %params.key,
            pool,
            deadline = %params.deadline,
            "Execution launched"
        );
        Ok(execution)
    }

    /// Register an execution with no background work. Its cleanup runs when
    /// the window closes or on stop, whichever comes first.
    pub fn launch_idle<P>(
        &self,
        params: &ExecutionParameters<P>,
        cleanup: Arc<dyn Cleanup>,
    ) -> FaultResult<RunningExecution> {
        self.launch::<P, Idle>(params, Vec::new(), Duration::ZERO, cleanup)
    }

    pub fn snapshot(&self, key: &ExecutionKey) -> Option<ExecutionSnapshot> {
        self.inner.registry.lookup(key).map(|e| e.snapshot())
    }

    /// Cancel an execution, wait briefly for its loop, clean up, unregister.
    ///
    /// Returns `None` if the key is not registered. Cleanup always runs for
    /// a registered execution, whether or not the wait succeeded.
    pub async fn halt(&self, key: &ExecutionKey) -> Option<Halted> {
        let execution = self.inner.registry.lookup(key)?;
        execution.cancel();

        let grace = self.inner.options.stop_grace();
        let finished = execution.wait_done(grace).await;
        if !finished {
            tracing::warn!(execution_key = %key, ?grace, "Worker loop still running after grace period");
        }

        let cleanup = execution.cleanup().cleanup().await;
        self.inner.registry.unregister(key);

        Some(Halted {
            snapshot: execution.snapshot(),
            finished,
            cleanup,
        })
    }

    /// Cancel every live execution and wait for their loops to clean up.
    ///
    /// Returns the number of loops that did not finish within the grace period.
    pub async fn shutdown(&self) -> usize {
        self.inner
            .registry
            .shutdown(self.inner.options.stop_grace())
            .await
    }
}

// Engine is shared across spawned tasks and signal handlers
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<Engine>;
};
