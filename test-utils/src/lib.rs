//! Shared fixtures for redfault integration tests.
//!
//! Every [`TestContext`] owns its own engine, registry and in-memory target,
//! so tests never observe each other's executions.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use redfault::config::EngineOptions;
use redfault::engine::ExecutionRegistry;
use redfault::lifecycle::{DynAction, Engine};
use redfault::target::{MemoryConnector, MemoryTarget, TargetDescriptor};
use serde_json::{Map, Value, json};
use tempfile::TempDir;

/// URL every context's in-memory target answers on.
pub const TARGET_URL: &str = "memory://test-target:6379";

/// Engine timings shrunk so loops react within tens of milliseconds.
pub fn fast_options() -> EngineOptions {
    EngineOptions {
        stop_grace_ms: 300,
        tick_backoff_ms: 50,
        tick_timeout_ms: 2_000,
        dial_timeout_ms: 500,
        op_timeout_ms: 500,
        hold_ms: 20,
        keepalive_interval_ms: 50,
    }
}

// ============================================================================
// TEST CONTEXT
// ============================================================================

/// Isolated engine plus the in-memory target it talks to.
pub struct TestContext {
    pub engine: Engine,
    pub target: MemoryTarget,
    temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_options(fast_options())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let target = MemoryTarget::new();
        let connector = Arc::new(MemoryConnector::new(target.clone()));
        let engine = Engine::with_registry(connector, options, ExecutionRegistry::new());
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self {
            engine,
            target,
            temp_dir,
        }
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        self.engine.registry()
    }

    pub fn descriptor(&self) -> TargetDescriptor {
        TargetDescriptor::new(TARGET_URL)
    }

    /// Scratch directory removed with the context.
    pub fn temp_path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    /// Catalog entry by id. Panics on an unknown id.
    pub fn action(&self, id: &str) -> Arc<dyn DynAction> {
        redfault::actions::find(&self.engine, id)
            .unwrap_or_else(|| panic!("no action with id {}", id))
    }

    /// Prepare `id` against this context's target.
    pub fn prepare(&self, id: &str, duration_ms: u64, extra: Value) -> (Arc<dyn DynAction>, Value) {
        let action = self.action(id);
        let state = action
            .prepare(&config(duration_ms, extra), self.descriptor())
            .expect("prepare failed");
        (action, state)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Raw action config: `extra` fields plus `duration` in milliseconds.
pub fn config(duration_ms: u64, extra: Value) -> Value {
    let mut map = match extra {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    map.insert("duration".into(), json!(duration_ms));
    Value::Object(map)
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Run `n` futures concurrently and collect their outputs in order.
pub async fn join_all<F: Future>(futures: Vec<F>) -> Vec<F::Output> {
    futures::future::join_all(futures).await
}
