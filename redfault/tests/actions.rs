//! Integration tests for each attack and check, driven through the
//! type-erased catalog against the in-memory target.

use std::time::{Duration, Instant};

use redfault::ProgressReport;
use redfault::target::PauseMode;
use redfault_test_utils::{TestContext, wait_until};
use serde_json::{Value, json};

// ============================================================================
// TEST FIXTURES
// ============================================================================

fn output_str(state: &Value, field: &str) -> String {
    state["outputs"][field]
        .as_str()
        .unwrap_or_else(|| panic!("missing output {}", field))
        .to_string()
}

fn metric(report: &ProgressReport, name: &str) -> Option<f64> {
    report
        .metrics
        .iter()
        .find(|m| m.name == name)
        .map(|m| m.value)
}

fn seed(ctx: &TestContext, prefix: &str, n: usize) {
    for i in 0..n {
        ctx.target.insert(&format!("{}{}", prefix, i), b"value");
    }
}

/// Sleep until a window of `ms` milliseconds has certainly closed.
async fn outlive(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms + 50)).await;
}

// ============================================================================
// ATTACKS: ARTIFACT PRODUCERS
// ============================================================================

#[tokio::test]
async fn memory_fill_writes_and_sweeps_prefixed_keys() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("memory-fill", 10_000, json!({"value_size": 256}));
    action.start(&mut state).await.unwrap();
    let prefix = output_str(&state, "prefix");

    assert!(
        wait_until(Duration::from_secs(2), || ctx.target.keys_with_prefix(&prefix).len() > 10).await
    );
    let status = action.status(&mut state).await.unwrap();
    assert!(metric(&status, "bytes_written").unwrap() > 0.0);

    let report = action.stop(&mut state).await.unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert!(ctx.target.keys_with_prefix(&prefix).is_empty());
}

#[tokio::test]
async fn memory_fill_settles_at_cap() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare(
        "memory-fill",
        10_000,
        json!({"value_size": 65536, "fill_rate": 10, "max_memory_mb": 1}),
    );
    action.start(&mut state).await.unwrap();
    let prefix = output_str(&state, "prefix");

    // 1 MB of 64 KiB values is 16 keys.
    assert!(wait_until(Duration::from_secs(2), || ctx.target.keys_with_prefix(&prefix).len() == 16).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ctx.target.keys_with_prefix(&prefix).len(), 16);

    action.stop(&mut state).await.unwrap();
    assert!(ctx.target.keys_with_prefix(&prefix).is_empty());
}

#[tokio::test]
async fn big_key_cycles_create_and_remove() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("big-key", 10_000, json!({"key_size_mb": 1, "num_keys": 3}));
    action.start(&mut state).await.unwrap();

    let engine = ctx.engine.clone();
    let key = redfault::ExecutionKey::from(state["params"]["key"].as_str().unwrap());
    assert!(
        wait_until(Duration::from_secs(2), || engine
            .snapshot(&key)
            .is_some_and(|s| s.removed >= 3))
        .await
    );

    let report = action.stop(&mut state).await.unwrap();
    let counters = report.counters.unwrap();
    assert!(counters.created >= 3);
    assert!(ctx.target.keys_with_prefix(&output_str(&state, "prefix")).is_empty());
}

#[tokio::test]
async fn cache_penetration_drives_misses() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("cache-penetration", 10_000, json!({"concurrency": 4}));
    action.start(&mut state).await.unwrap();

    assert!(wait_until(Duration::from_secs(2), || ctx.target.keyspace_stats().1 > 100).await);
    let status = action.status(&mut state).await.unwrap();
    assert!(metric(&status, "requests").unwrap() > 0.0);

    action.stop(&mut state).await.unwrap();
    let (hits, _) = ctx.target.keyspace_stats();
    assert_eq!(hits, 0);
    // Worker handles are released when the pool exits.
    assert_eq!(ctx.target.connected_clients(), 0);
}

#[tokio::test]
async fn connection_exhaustion_holds_up_to_the_server_limit() {
    let ctx = TestContext::new();
    ctx.target.set_config("maxclients", "5");
    let (action, mut state) = ctx.prepare("connection-exhaustion", 10_000, json!({"num_connections": 20}));
    action.start(&mut state).await.unwrap();

    assert_eq!(state["outputs"]["opened"], 5);
    assert!(state["outputs"]["failed_opens"].as_u64().unwrap() > 0);
    assert_eq!(ctx.target.connected_clients(), 5);

    action.stop(&mut state).await.unwrap();
    assert_eq!(ctx.target.connected_clients(), 0);
}

#[tokio::test]
async fn connection_exhaustion_releases_at_deadline() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("connection-exhaustion", 200, json!({"num_connections": 8}));
    action.start(&mut state).await.unwrap();
    assert_eq!(ctx.target.connected_clients(), 8);

    assert!(wait_until(Duration::from_secs(2), || ctx.target.connected_clients() == 0).await);
    let report = action.stop(&mut state).await.unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

#[tokio::test]
async fn connection_exhaustion_stops_promptly_during_slow_keepalive() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("connection-exhaustion", 10_000, json!({"num_connections": 10}));
    action.start(&mut state).await.unwrap();
    assert_eq!(ctx.target.connected_clients(), 10);

    // One keepalive round now takes about a second.
    ctx.target.set_latency(Duration::from_millis(100));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let began = Instant::now();
    let report = action.stop(&mut state).await.unwrap();
    assert!(began.elapsed() < Duration::from_millis(700), "stop took {:?}", began.elapsed());
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert!(wait_until(Duration::from_secs(2), || ctx.target.connected_clients() == 0).await);
}

// ============================================================================
// ATTACKS: CONFIGURATION CHANGES
// ============================================================================

#[tokio::test]
async fn maxmemory_limit_applies_and_restores() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare(
        "maxmemory-limit",
        10_000,
        json!({"maxmemory": "64mb", "eviction_policy": "allkeys-lru"}),
    );
    action.start(&mut state).await.unwrap();
    assert_eq!(ctx.target.config("maxmemory").as_deref(), Some("64mb"));
    assert_eq!(ctx.target.config("maxmemory-policy").as_deref(), Some("allkeys-lru"));
    assert_eq!(state["outputs"]["original_maxmemory"], "0");

    let status = action.status(&mut state).await.unwrap();
    assert!(metric(&status, "used_memory").is_some());

    let report = action.stop(&mut state).await.unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(ctx.target.config("maxmemory").as_deref(), Some("0"));
    assert_eq!(ctx.target.config("maxmemory-policy").as_deref(), Some("noeviction"));
}

#[tokio::test]
async fn maxmemory_limit_keep_leaves_policy_alone() {
    let ctx = TestContext::new();
    ctx.target.set_config("maxmemory-policy", "volatile-ttl");
    let (action, mut state) = ctx.prepare(
        "maxmemory-limit",
        10_000,
        json!({"maxmemory": "32mb", "eviction_policy": "keep"}),
    );
    action.start(&mut state).await.unwrap();
    assert_eq!(ctx.target.config("maxmemory-policy").as_deref(), Some("volatile-ttl"));

    action.stop(&mut state).await.unwrap();
    assert_eq!(ctx.target.config("maxmemory").as_deref(), Some("0"));
    assert_eq!(ctx.target.config("maxmemory-policy").as_deref(), Some("volatile-ttl"));
}

#[tokio::test]
async fn maxmemory_limit_rejected_policy_rolls_back() {
    let ctx = TestContext::new();
    ctx.target.fail_config_set("maxmemory-policy");
    let (action, mut state) = ctx.prepare(
        "maxmemory-limit",
        10_000,
        json!({"maxmemory": "64mb", "eviction_policy": "allkeys-lru"}),
    );

    assert!(action.start(&mut state).await.is_err());
    assert_eq!(state["phase"], "prepared");
    assert_eq!(ctx.target.config("maxmemory").as_deref(), Some("0"));
    assert!(ctx.registry().is_empty());
}

#[tokio::test]
async fn maxmemory_limit_restores_when_window_closes() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("maxmemory-limit", 150, json!({"maxmemory": "1mb"}));
    action.start(&mut state).await.unwrap();
    assert_eq!(ctx.target.config("maxmemory").as_deref(), Some("1mb"));

    assert!(
        wait_until(Duration::from_secs(2), || ctx.target.config("maxmemory").as_deref()
            == Some("0"))
        .await
    );
    action.stop(&mut state).await.unwrap();
}

#[tokio::test]
async fn client_pause_is_lifted_on_stop() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("client-pause", 10_000, json!({"pause_mode": "write"}));
    action.start(&mut state).await.unwrap();
    assert_eq!(ctx.target.paused(), Some(PauseMode::Write));

    let report = action.stop(&mut state).await.unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(ctx.target.paused(), None);
}

#[tokio::test]
async fn client_pause_rejects_empty_window() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("client-pause", 0, json!({}));
    assert!(matches!(
        action.start(&mut state).await,
        Err(redfault::FaultError::Validation(_))
    ));
    assert_eq!(ctx.target.paused(), None);
}

#[tokio::test]
async fn sentinel_stop_puts_target_to_sleep_for_the_window() {
    let ctx = TestContext::new();
    ctx.target.set_redis_mode("sentinel");
    let (action, mut state) = ctx.prepare("sentinel-stop", 1_000, json!({}));
    let started = action.start(&mut state).await.unwrap();
    assert_eq!(started.messages.len(), 1);
    assert_eq!(state["outputs"]["sleep_seconds"], 1);
    assert!(ctx.target.is_asleep());
    assert_eq!(ctx.registry().len(), 1);

    let status = action.status(&mut state).await.unwrap();
    assert!(!status.completed);
    assert!(status.messages[0].text.contains("remaining"));

    outlive(1_000).await;
    assert!(!ctx.target.is_asleep());
    let status = action.status(&mut state).await.unwrap();
    assert!(status.completed);

    let report = action.stop(&mut state).await.unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert!(ctx.registry().is_empty());
}

#[tokio::test]
async fn sentinel_stop_rejected_debug_stays_prepared() {
    let ctx = TestContext::new();
    ctx.target.disable_debug(true);
    let (action, mut state) = ctx.prepare("sentinel-stop", 2_000, json!({}));

    let err = action.start(&mut state).await.unwrap_err();
    assert!(err.to_string().contains("DEBUG command not allowed"));
    assert_eq!(state["phase"], "prepared");
    assert!(ctx.registry().is_empty());
}

#[tokio::test]
async fn sentinel_stop_zero_window_is_invalid() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("sentinel-stop", 0, json!({}));
    let err = action.start(&mut state).await.unwrap_err();
    assert!(matches!(err, redfault::FaultError::Validation(_)));
    assert!(!ctx.target.is_asleep());
}

// ============================================================================
// ATTACKS: KEYSPACE
// ============================================================================

#[tokio::test]
async fn key_delete_restores_on_stop() {
    let ctx = TestContext::new();
    seed(&ctx, "session:", 5);
    ctx.target.insert("other", b"keep");

    let (action, mut state) = ctx.prepare("key-delete", 10_000, json!({"pattern": "session:*"}));
    action.start(&mut state).await.unwrap();
    assert_eq!(state["outputs"]["matched"], 5);
    assert_eq!(state["outputs"]["backed_up"], 5);
    assert!(ctx.target.keys_with_prefix("session:").is_empty());
    assert!(ctx.target.contains_key("other"));

    let report = action.stop(&mut state).await.unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(ctx.target.keys_with_prefix("session:").len(), 5);
    assert_eq!(ctx.target.value("session:0").as_deref(), Some(&b"value"[..]));
    assert!(report.messages.iter().any(|m| m.text == "restored 5 of 5 deleted keys"));
}

#[tokio::test]
async fn key_delete_retries_restore_that_failed_at_deadline() {
    let ctx = TestContext::new();
    seed(&ctx, "user:", 3);
    let (action, mut state) = ctx.prepare("key-delete", 150, json!({"pattern": "user:*"}));
    action.start(&mut state).await.unwrap();

    // The window closes while the target is down, so the restore fails.
    ctx.target.set_reachable(false);
    let key = redfault::ExecutionKey::from(state["params"]["key"].as_str().unwrap());
    let execution = ctx.registry().lookup(&key).unwrap();
    assert!(execution.wait_done(Duration::from_secs(2)).await);
    assert!(!execution.loop_report().unwrap().is_clean());
    ctx.target.set_reachable(true);
    assert!(ctx.target.keys_with_prefix("user:").is_empty());

    // Stop retries whatever is still pending.
    let report = action.stop(&mut state).await.unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(ctx.target.keys_with_prefix("user:").len(), 3);
}

#[tokio::test]
async fn key_delete_without_restore_leaves_keys_gone() {
    let ctx = TestContext::new();
    seed(&ctx, "tmp:", 4);
    let (action, mut state) = ctx.prepare(
        "key-delete",
        10_000,
        json!({"pattern": "tmp:*", "max_keys": 2, "restore_on_stop": false}),
    );
    action.start(&mut state).await.unwrap();
    assert_eq!(state["outputs"]["deleted_keys"].as_array().unwrap().len(), 2);

    action.stop(&mut state).await.unwrap();
    assert_eq!(ctx.target.keys_with_prefix("tmp:").len(), 2);
}

#[tokio::test]
async fn cache_expiration_sets_ttl_on_matches() {
    let ctx = TestContext::new();
    seed(&ctx, "cache:", 3);
    ctx.target.insert("durable", b"x");

    let (action, mut state) = ctx.prepare(
        "cache-expiration",
        10_000,
        json!({"pattern": "cache:*", "ttl_seconds": 30}),
    );
    action.start(&mut state).await.unwrap();
    assert_eq!(state["outputs"]["expired"], 3);

    let ttl = ctx.target.ttl("cache:0").expect("ttl set");
    assert!(ttl > Duration::from_secs(25) && ttl <= Duration::from_secs(30));
    assert!(ctx.target.ttl("durable").is_none());

    // Expiry is the effect; stop does not undo it.
    action.stop(&mut state).await.unwrap();
    assert!(ctx.target.ttl("cache:1").is_some());
}

#[tokio::test]
async fn cache_expiration_warns_without_matches() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("cache-expiration", 10_000, json!({"pattern": "none:*"}));
    let report = action.start(&mut state).await.unwrap();
    assert_eq!(report.messages[0].level, redfault::lifecycle::Level::Warn);
    assert_eq!(state["outputs"]["matched"], 0);
    action.stop(&mut state).await.unwrap();
}

#[tokio::test]
async fn bgsave_advances_last_save() {
    let ctx = TestContext::new();
    let before = ctx.target.last_save();
    let (action, mut state) = ctx.prepare("bgsave", 10_000, json!({}));
    action.start(&mut state).await.unwrap();
    assert!(ctx.target.last_save() > before);

    action.status(&mut state).await.unwrap();
    assert!(state["outputs"]["completed_at"].as_i64().unwrap() > before);
    action.stop(&mut state).await.unwrap();
}

#[tokio::test]
async fn bgsave_skips_when_already_running() {
    let ctx = TestContext::new();
    ctx.target.set_bgsave_in_progress(true);
    let before = ctx.target.last_save();
    let (action, mut state) = ctx.prepare("bgsave", 10_000, json!({}));
    action.start(&mut state).await.unwrap();

    assert_eq!(state["outputs"]["skipped"], true);
    assert_eq!(ctx.target.last_save(), before);
    action.stop(&mut state).await.unwrap();
}

// ============================================================================
// CHECKS
// ============================================================================

#[tokio::test]
async fn latency_check_fails_when_slow_at_completion() {
    let ctx = TestContext::new();
    ctx.target.set_latency(Duration::from_millis(30));
    let (action, mut state) = ctx.prepare("latency", 100, json!({"max_latency_ms": 10}));
    action.start(&mut state).await.unwrap();

    outlive(100).await;
    let status = action.status(&mut state).await.unwrap();
    assert!(status.completed);
    assert!(status.has_failed());
    action.stop(&mut state).await.unwrap();
}

#[tokio::test]
async fn latency_check_that_recovers_passes() {
    let ctx = TestContext::new();
    ctx.target.set_latency(Duration::from_millis(30));
    let (action, mut state) = ctx.prepare("latency", 300, json!({"max_latency_ms": 10}));
    action.start(&mut state).await.unwrap();

    let early = action.status(&mut state).await.unwrap();
    assert!(!early.completed);
    assert!(!early.has_failed());
    assert!(!early.messages.is_empty());

    ctx.target.set_latency(Duration::ZERO);
    outlive(300).await;
    let late = action.status(&mut state).await.unwrap();
    assert!(late.completed);
    assert!(!late.has_failed());
    assert_eq!(state["outputs"]["violations"], 1);
    action.stop(&mut state).await.unwrap();
}

#[tokio::test]
async fn memory_check_against_maxmemory() {
    let ctx = TestContext::new();
    // The idle store reports 1 MB used.
    ctx.target.set_config("maxmemory", "1100000");
    let (action, mut state) = ctx.prepare("memory", 50, json!({"max_memory_percent": 80}));
    action.start(&mut state).await.unwrap();

    outlive(50).await;
    let status = action.status(&mut state).await.unwrap();
    assert!(status.has_failed());
    assert!(metric(&status, "memory_usage_percent").unwrap() > 80.0);
    action.stop(&mut state).await.unwrap();
}

#[tokio::test]
async fn memory_check_without_limit_passes() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("memory", 50, json!({}));
    action.start(&mut state).await.unwrap();
    outlive(50).await;
    assert!(!action.status(&mut state).await.unwrap().has_failed());
    action.stop(&mut state).await.unwrap();
}

#[tokio::test]
async fn hit_rate_check_fails_on_misses() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("hit-rate", 100, json!({"min_hit_rate": 50}));
    action.start(&mut state).await.unwrap();

    // Cache penetration against the same target produces only misses.
    let (penetration, mut attack) = ctx.prepare("cache-penetration", 10_000, json!({"concurrency": 2}));
    penetration.start(&mut attack).await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || ctx.target.keyspace_stats().1 > 10).await);

    outlive(100).await;
    let status = action.status(&mut state).await.unwrap();
    assert!(status.has_failed());
    assert_eq!(metric(&status, "hit_rate"), Some(0.0));

    penetration.stop(&mut attack).await.unwrap();
    action.stop(&mut state).await.unwrap();
}

#[tokio::test]
async fn connections_check_sees_exhaustion() {
    let ctx = TestContext::new();
    let (check, mut state) = ctx.prepare("connections", 100, json!({"max_connections": 5}));
    check.start(&mut state).await.unwrap();

    let (attack, mut attack_state) =
        ctx.prepare("connection-exhaustion", 10_000, json!({"num_connections": 10}));
    attack.start(&mut attack_state).await.unwrap();

    outlive(100).await;
    let status = check.status(&mut state).await.unwrap();
    assert!(status.has_failed());
    assert!(state["outputs"]["max_observed"].as_u64().unwrap() >= 10);

    attack.stop(&mut attack_state).await.unwrap();
    check.stop(&mut state).await.unwrap();
}

#[tokio::test]
async fn replication_check_on_lagging_replica() {
    let ctx = TestContext::new();
    ctx.target.set_replica(30, true);
    let (action, mut state) = ctx.prepare("replication", 50, json!({"max_lag_seconds": 10}));
    action.start(&mut state).await.unwrap();

    outlive(50).await;
    let status = action.status(&mut state).await.unwrap();
    assert!(status.has_failed());
    assert_eq!(metric(&status, "replication_lag_seconds"), Some(30.0));
    action.stop(&mut state).await.unwrap();
}

#[tokio::test]
async fn replication_check_detects_link_down() {
    let ctx = TestContext::new();
    ctx.target.set_replica(0, false);
    let (action, mut state) = ctx.prepare("replication", 50, json!({}));
    action.start(&mut state).await.unwrap();

    outlive(50).await;
    let status = action.status(&mut state).await.unwrap();
    assert_eq!(status.failure.as_deref(), Some("master link is down"));
    assert_eq!(state["outputs"]["link_down_detected"], true);
    action.stop(&mut state).await.unwrap();
}

#[tokio::test]
async fn replication_check_on_master_passes() {
    let ctx = TestContext::new();
    ctx.target.set_connected_replicas(2);
    let (action, mut state) = ctx.prepare("replication", 50, json!({}));
    action.start(&mut state).await.unwrap();

    outlive(50).await;
    let status = action.status(&mut state).await.unwrap();
    assert!(!status.has_failed());
    assert_eq!(metric(&status, "connected_replicas"), Some(2.0));
    action.stop(&mut state).await.unwrap();
}

#[tokio::test]
async fn blocked_clients_check() {
    let ctx = TestContext::new();
    ctx.target.set_blocked_clients(3);
    let (action, mut state) = ctx.prepare("blocked-clients", 50, json!({"max_blocked_clients": 2}));
    action.start(&mut state).await.unwrap();

    outlive(50).await;
    let status = action.status(&mut state).await.unwrap();
    assert_eq!(status.failure.as_deref(), Some("blocked clients 3 exceeds threshold 2"));
    action.stop(&mut state).await.unwrap();
}

#[tokio::test]
async fn check_against_vanished_target_fails_at_completion() {
    let ctx = TestContext::new();
    let (action, mut state) = ctx.prepare("blocked-clients", 50, json!({}));
    action.start(&mut state).await.unwrap();

    ctx.target.set_reachable(false);
    outlive(50).await;
    let status = action.status(&mut state).await.unwrap();
    assert!(status.has_failed());
    assert!(status.failure.unwrap().starts_with("target unreachable"));
    action.stop(&mut state).await.unwrap();
}
