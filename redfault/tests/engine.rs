//! Integration tests for the execution engine: cancellation, deadlines,
//! cleanup, and isolation between concurrent executions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redfault::engine::{
    ExecutionKey, ExecutionParameters, NoCleanup, PrefixSweep, Tick, TickContext, TickOutcome,
};
use redfault::target::TargetHandle;
use redfault::{FaultError, FaultResult};
use redfault_test_utils::{TestContext, join_all, wait_until};
use serde_json::{Value, json};

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// A tick that fails every time.
struct AlwaysFails;

#[async_trait]
impl Tick for AlwaysFails {
    async fn tick(&mut self, _ctx: &TickContext) -> FaultResult<TickOutcome> {
        Err(FaultError::Target("injected failure".into()))
    }
}

/// A tick that succeeds after a short hold.
struct Steady;

#[async_trait]
impl Tick for Steady {
    async fn tick(&mut self, ctx: &TickContext) -> FaultResult<TickOutcome> {
        ctx.hold(Duration::from_millis(2)).await;
        Ok(TickOutcome::Continue)
    }
}

/// A tick that writes one artifact and then sleeps without watching for
/// cancellation, so its loop outlives any grace period.
struct Lingering {
    prefix: String,
}

#[async_trait]
impl Tick for Lingering {
    async fn tick(&mut self, ctx: &TickContext) -> FaultResult<TickOutcome> {
        let mut handle = ctx.open().await?;
        let written = handle.set(&format!("{}0", self.prefix), b"x").await;
        handle.close().await;
        written?;
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        Ok(TickOutcome::Continue)
    }
}

fn params(ctx: &TestContext, duration: Duration) -> ExecutionParameters<()> {
    ExecutionParameters::new(ctx.descriptor(), duration, ())
}

fn key_of(state: &Value) -> ExecutionKey {
    ExecutionKey::from(state["params"]["key"].as_str().expect("state carries a key"))
}

fn big_key_config() -> Value {
    json!({"key_size_mb": 1, "num_keys": 2})
}

// ============================================================================
// CANCELLATION AND DEADLINES
// ============================================================================

#[tokio::test]
async fn stop_is_observed_within_grace() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("big-key", 60_000, big_key_config());
    action.start(&mut state).await.unwrap();

    let began = Instant::now();
    let report = action.stop(&mut state).await.unwrap();
    assert!(began.elapsed() < Duration::from_secs(2));
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert!(ctx.registry().is_empty());
    assert_eq!(state["phase"], "stopped");
}

#[tokio::test]
async fn worker_loop_self_terminates_at_deadline() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("big-key", 300, big_key_config());
    action.start(&mut state).await.unwrap();
    let prefix = state["outputs"]["prefix"].as_str().unwrap().to_string();

    let key = key_of(&state);
    let execution = ctx.registry().lookup(&key).expect("registered");
    assert!(execution.wait_done(Duration::from_secs(3)).await);

    // The loop cleaned up on its own; nothing prefixed is left behind.
    assert!(ctx.target.keys_with_prefix(&prefix).is_empty());
    let status = action.status(&mut state).await.unwrap();
    assert!(status.completed);

    action.stop(&mut state).await.unwrap();
}

#[tokio::test]
async fn zero_duration_completes_with_no_ticks() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("memory-fill", 0, json!({}));
    action.start(&mut state).await.unwrap();

    let status = action.status(&mut state).await.unwrap();
    assert!(status.completed);
    let report = action.stop(&mut state).await.unwrap();
    let counters = report.counters.expect("counters recorded");
    assert!(counters.ticks <= 1);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("big-key", 10_000, big_key_config());
    action.start(&mut state).await.unwrap();

    let first = action.stop(&mut state).await.unwrap();
    let second = action.stop(&mut state).await.unwrap();
    assert!(second.warnings.is_empty());
    assert_eq!(second.messages[0].text, "execution already stopped");
    assert_eq!(first.counters, second.counters);
}

// ============================================================================
// CLEANUP
// ============================================================================

#[tokio::test]
async fn sweep_at_stop_removes_keys_left_by_failed_deletes() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("big-key", 10_000, big_key_config());
    ctx.target.fail_deletes(true);
    action.start(&mut state).await.unwrap();
    let prefix = state["outputs"]["prefix"].as_str().unwrap().to_string();

    assert!(
        wait_until(Duration::from_secs(3), || !ctx
            .target
            .keys_with_prefix(&prefix)
            .is_empty())
        .await
    );

    ctx.target.fail_deletes(false);
    action.stop(&mut state).await.unwrap();
    assert!(ctx.target.keys_with_prefix(&prefix).is_empty());
}

#[tokio::test]
async fn shutdown_cleans_stragglers_and_leaves_them_for_stop() {
    let ctx = TestContext::new();
    let params = params(&ctx, Duration::from_secs(30));
    let prefix = params.key.artifact_prefix("linger");
    let sweep = PrefixSweep::new(ctx.engine.connector(), ctx.descriptor(), prefix.clone());
    let execution = ctx
        .engine
        .launch(
            &params,
            vec![Lingering {
                prefix: prefix.clone(),
            }],
            Duration::ZERO,
            Arc::new(sweep),
        )
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || !ctx
            .target
            .keys_with_prefix(&prefix)
            .is_empty())
        .await
    );

    assert_eq!(ctx.engine.shutdown().await, 1);
    assert!(ctx.target.keys_with_prefix(&prefix).is_empty());
    assert!(ctx.registry().contains(&params.key));

    let halted = ctx.engine.halt(&params.key).await.expect("straggler still registered");
    assert!(!halted.finished);
    assert!(halted.cleanup.is_clean());
    assert!(ctx.registry().is_empty());

    assert!(execution.wait_done(Duration::from_secs(3)).await);
    assert!(ctx.target.keys_with_prefix(&prefix).is_empty());
}

#[tokio::test]
async fn halting_an_absent_key_is_a_noop() {
    let ctx = TestContext::new();
    let absent = ExecutionKey::from("memory://nowhere:6379/0#NOPE");
    assert!(ctx.engine.halt(&absent).await.is_none());
    assert!(ctx.registry().unregister(&absent).is_none());
}

// ============================================================================
// UNREACHABLE TARGET
// ============================================================================

#[tokio::test]
async fn unreachable_start_stays_prepared() {
    let ctx = TestContext::new();
    ctx.target.set_reachable(false);
    let (action, mut state) = ctx.prepare("big-key", 10_000, big_key_config());

    let err = action.start(&mut state).await.unwrap_err();
    assert!(matches!(err, FaultError::UnreachableTarget(_)));
    assert_eq!(state["phase"], "prepared");
    assert!(ctx.registry().is_empty());

    let status = action.status(&mut state).await.unwrap();
    assert_eq!(status.messages[0].text, "execution not running");

    let report = action.stop(&mut state).await.unwrap();
    assert_eq!(report.messages[0].text, "execution never started");
    assert_eq!(state["phase"], "stopped");
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test]
async fn stopping_one_execution_leaves_others_running() {
    let ctx = TestContext::new();
    let mut runs = Vec::new();
    for _ in 0..3 {
        let (action, mut state) = ctx.prepare("memory-fill", 10_000, json!({"value_size": 64}));
        action.start(&mut state).await.unwrap();
        runs.push((action, state));
    }
    assert_eq!(ctx.registry().len(), 3);

    let (action, state) = &mut runs[0];
    action.stop(state).await.unwrap();
    assert_eq!(ctx.registry().len(), 2);

    for (action, state) in runs.iter_mut().skip(1) {
        assert!(ctx.registry().contains(&key_of(state)));
        let status = action.status(state).await.unwrap();
        assert!(!status.completed);
    }
    for (action, state) in runs.iter_mut().skip(1) {
        action.stop(state).await.unwrap();
    }
    assert!(ctx.registry().is_empty());
}

#[tokio::test]
async fn always_failing_tick_backs_off_until_deadline() {
    let ctx = TestContext::new();
    let params = params(&ctx, Duration::from_millis(400));
    let execution = ctx
        .engine
        .launch(&params, vec![AlwaysFails], Duration::ZERO, Arc::new(NoCleanup))
        .unwrap();

    let mut last = 0;
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(40)).await;
        let failures = execution.failures();
        assert!(failures >= last);
        last = failures;
    }
    assert!(execution.wait_done(Duration::from_secs(2)).await);
    assert_eq!(execution.successes(), 0);
    assert!(execution.failures() > 0);
    // Backoff bounds the failure rate.
    assert!(execution.failures() < 50);

    let halted = ctx.engine.halt(&params.key).await.expect("still registered");
    assert!(halted.finished);
    assert_eq!(halted.snapshot.last_error.as_deref(), Some("target operation failed: injected failure"));
}

#[tokio::test]
async fn concurrent_snapshots_are_consistent() {
    let ctx = TestContext::new();
    let params = params(&ctx, Duration::from_secs(10));
    ctx.engine
        .launch(
            &params,
            vec![Steady, Steady, Steady, Steady],
            Duration::ZERO,
            Arc::new(NoCleanup),
        )
        .unwrap();

    let readers = (0..4)
        .map(|_| {
            let engine = ctx.engine.clone();
            let key = params.key.clone();
            async move {
                for _ in 0..50 {
                    let snapshot = engine.snapshot(&key).expect("registered");
                    assert_eq!(snapshot.ticks, snapshot.successes + snapshot.failures);
                    tokio::task::yield_now().await;
                }
            }
        })
        .collect();
    join_all(readers).await;

    let halted = ctx.engine.halt(&params.key).await.unwrap();
    assert!(halted.snapshot.successes > 0);
}

#[tokio::test]
async fn shutdown_cancels_every_execution() {
    let ctx = TestContext::new();
    for _ in 0..2 {
        let (action, mut state) = ctx.prepare("cache-penetration", 10_000, json!({"concurrency": 2}));
        action.start(&mut state).await.unwrap();
    }
    assert_eq!(ctx.registry().len(), 2);

    assert_eq!(ctx.engine.shutdown().await, 0);
    assert!(ctx.registry().is_empty());
}
