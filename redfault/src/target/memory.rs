//! In-process simulated data store.
//!
//! Served for `memory://` URLs. Behaves like a single Redis node closely
//! enough for the engine and the actions to run end to end, and exposes
//! fault switches so tests can make the target unreachable or make
//! individual operations fail.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use redfault_shared::constants::config::{MAXMEMORY, MAXMEMORY_POLICY};
use redfault_shared::errors::{FaultError, FaultResult};

use super::info::InfoSection;
use super::{PauseMode, TargetConnector, TargetDescriptor, TargetHandle};

/// Memory reported on top of the stored payload, like an idle server.
const BASE_USED_MEMORY: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
enum Role {
    Master,
    Replica { lag_seconds: i64, link_up: bool },
}

struct Store {
    reachable: bool,
    fail_deletes: bool,
    failing_config: HashSet<String>,
    latency: Duration,

    data: BTreeMap<String, Vec<u8>>,
    expiry: HashMap<String, Instant>,
    config: HashMap<String, String>,

    keyspace_hits: u64,
    keyspace_misses: u64,
    connected_clients: u64,
    blocked_clients: u64,
    connected_replicas: u64,
    role: Role,

    paused: Option<(Instant, PauseMode)>,
    asleep_until: Option<Instant>,
    debug_disabled: bool,
    redis_mode: String,
    bgsave_in_progress: bool,
    last_save: i64,
}

impl Store {
    fn new() -> Self {
        let mut config = HashMap::new();
        config.insert(MAXMEMORY.to_string(), "0".to_string());
        config.insert(MAXMEMORY_POLICY.to_string(), "noeviction".to_string());
        config.insert("maxclients".to_string(), "10000".to_string());

        Self {
            reachable: true,
            fail_deletes: false,
            failing_config: HashSet::new(),
            latency: Duration::ZERO,
            data: BTreeMap::new(),
            expiry: HashMap::new(),
            config,
            keyspace_hits: 0,
            keyspace_misses: 0,
            connected_clients: 0,
            blocked_clients: 0,
            connected_replicas: 0,
            role: Role::Master,
            paused: None,
            asleep_until: None,
            debug_disabled: false,
            redis_mode: "standalone".to_string(),
            bgsave_in_progress: false,
            last_save: chrono::Utc::now().timestamp(),
        }
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .expiry
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.expiry.remove(&key);
            self.data.remove(&key);
        }
    }

    /// A `DEBUG SLEEP` is still blocking the server.
    fn asleep(&mut self) -> bool {
        match self.asleep_until {
            Some(until) if until > Instant::now() => true,
            Some(_) => {
                self.asleep_until = None;
                false
            }
            None => false,
        }
    }

    fn used_memory(&self) -> u64 {
        BASE_USED_MEMORY
            + self
                .data
                .iter()
                .map(|(k, v)| (k.len() + v.len()) as u64)
                .sum::<u64>()
    }

    fn max_clients(&self) -> u64 {
        self.config
            .get("maxclients")
            .and_then(|v| v.parse().ok())
            .unwrap_or(10_000)
    }
}

/// Shared handle to one simulated data store.
///
/// Cloning is cheap; all clones observe the same data.
#[derive(Clone)]
pub struct MemoryTarget {
    store: Arc<Mutex<Store>>,
}

impl Default for MemoryTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::new())),
        }
    }

    // ------------------------------------------------------------------
    // Fault switches
    // ------------------------------------------------------------------

    /// Make new connections and every operation fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.store.lock().reachable = reachable;
    }

    /// Make every `delete` fail while leaving the key in place.
    pub fn fail_deletes(&self, fail: bool) {
        self.store.lock().fail_deletes = fail;
    }

    /// Make `CONFIG SET <name>` fail.
    pub fn fail_config_set(&self, name: &str) {
        self.store.lock().failing_config.insert(name.to_string());
    }

    /// Simulated round-trip time reported by `probe`.
    pub fn set_latency(&self, latency: Duration) {
        self.store.lock().latency = latency;
    }

    pub fn set_blocked_clients(&self, blocked: u64) {
        self.store.lock().blocked_clients = blocked;
    }

    /// Turn this node into a replica with the given link state.
    pub fn set_replica(&self, lag_seconds: i64, link_up: bool) {
        self.store.lock().role = Role::Replica {
            lag_seconds,
            link_up,
        };
    }

    pub fn set_connected_replicas(&self, replicas: u64) {
        self.store.lock().connected_replicas = replicas;
    }

    /// Value reported as `redis_mode` by `INFO server`.
    pub fn set_redis_mode(&self, mode: &str) {
        self.store.lock().redis_mode = mode.to_string();
    }

    /// Reject `DEBUG` like a server started without `enable-debug-command`.
    pub fn disable_debug(&self, disabled: bool) {
        self.store.lock().debug_disabled = disabled;
    }

    pub fn set_bgsave_in_progress(&self, in_progress: bool) {
        self.store.lock().bgsave_in_progress = in_progress;
    }

    /// Set a configuration parameter directly, bypassing `fail_config_set`.
    pub fn set_config(&self, name: &str, value: &str) {
        self.store
            .lock()
            .config
            .insert(name.to_string(), value.to_string());
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn insert(&self, key: &str, value: &[u8]) {
        self.store.lock().data.insert(key.to_string(), value.to_vec());
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        let mut store = self.store.lock();
        store.purge_expired();
        store.data.get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.value(key).is_some()
    }

    /// Keys starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut store = self.store.lock();
        store.purge_expired();
        store
            .data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn key_count(&self) -> usize {
        let mut store = self.store.lock();
        store.purge_expired();
        store.data.len()
    }

    /// Remaining TTL of a key, if one is set.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let store = self.store.lock();
        store
            .expiry
            .get(key)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn config(&self, name: &str) -> Option<String> {
        self.store.lock().config.get(name).cloned()
    }

    pub fn connected_clients(&self) -> u64 {
        self.store.lock().connected_clients
    }

    pub fn keyspace_stats(&self) -> (u64, u64) {
        let store = self.store.lock();
        (store.keyspace_hits, store.keyspace_misses)
    }

    /// Current pause mode, if clients are paused.
    pub fn paused(&self) -> Option<PauseMode> {
        let store = self.store.lock();
        match store.paused {
            Some((until, mode)) if until > Instant::now() => Some(mode),
            _ => None,
        }
    }

    pub fn last_save(&self) -> i64 {
        self.store.lock().last_save
    }

    /// The server is blocked by `DEBUG SLEEP`.
    pub fn is_asleep(&self) -> bool {
        self.store.lock().asleep()
    }

    fn connect(&self) -> FaultResult<()> {
        let mut store = self.store.lock();
        if !store.reachable {
            return Err(FaultError::UnreachableTarget(
                "memory target: connection refused".into(),
            ));
        }
        if store.connected_clients >= store.max_clients() {
            return Err(FaultError::UnreachableTarget(
                "memory target: max number of clients reached".into(),
            ));
        }
        store.connected_clients += 1;
        Ok(())
    }

    fn disconnect(&self) {
        let mut store = self.store.lock();
        store.connected_clients = store.connected_clients.saturating_sub(1);
    }

    /// Run `op` against the store, failing with `Target` when unreachable.
    fn with_store<T>(&self, op: impl FnOnce(&mut Store) -> FaultResult<T>) -> FaultResult<T> {
        let mut store = self.store.lock();
        if !store.reachable {
            return Err(FaultError::Target("memory target: connection reset".into()));
        }
        if store.asleep() {
            return Err(FaultError::Target("memory target: no reply, server is sleeping".into()));
        }
        store.purge_expired();
        op(&mut store)
    }
}

/// Connector handing out handles to one [`MemoryTarget`].
#[derive(Clone, Default)]
pub struct MemoryConnector {
    target: MemoryTarget,
}

impl MemoryConnector {
    pub fn new(target: MemoryTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &MemoryTarget {
        &self.target
    }
}

#[async_trait]
impl TargetConnector for MemoryConnector {
    async fn open(&self, _target: &TargetDescriptor) -> FaultResult<Box<dyn TargetHandle>> {
        self.target.connect()?;
        Ok(Box::new(MemoryHandle {
            target: self.target.clone(),
            closed: false,
        }))
    }
}

struct MemoryHandle {
    target: MemoryTarget,
    closed: bool,
}

impl MemoryHandle {
    fn ensure_open(&self) -> FaultResult<()> {
        if self.closed {
            return Err(FaultError::Target("handle is closed".into()));
        }
        Ok(())
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        if !self.closed {
            self.target.disconnect();
        }
    }
}

#[async_trait]
impl TargetHandle for MemoryHandle {
    async fn probe(&mut self) -> FaultResult<Duration> {
        self.ensure_open()
            .map_err(|e| FaultError::UnreachableTarget(e.to_string()))?;
        let latency = {
            let mut store = self.target.store.lock();
            if !store.reachable || store.asleep() {
                return Err(FaultError::UnreachableTarget(
                    "memory target: no reply to PING".into(),
                ));
            }
            store.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(latency)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.target.disconnect();
        }
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> FaultResult<()> {
        self.ensure_open()?;
        self.target.with_store(|store| {
            store.expiry.remove(key);
            store.data.insert(key.to_string(), value.to_vec());
            Ok(())
        })
    }

    async fn get(&mut self, key: &str) -> FaultResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.target.with_store(|store| {
            let value = store.data.get(key).cloned();
            if value.is_some() {
                store.keyspace_hits += 1;
            } else {
                store.keyspace_misses += 1;
            }
            Ok(value)
        })
    }

    async fn delete(&mut self, key: &str) -> FaultResult<bool> {
        self.ensure_open()?;
        self.target.with_store(|store| {
            if store.fail_deletes {
                return Err(FaultError::Target(format!("DEL {} rejected", key)));
            }
            store.expiry.remove(key);
            Ok(store.data.remove(key).is_some())
        })
    }

    async fn scan(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> FaultResult<(u64, Vec<String>)> {
        self.ensure_open()?;
        self.target.with_store(|store| {
            // The cursor is a position in the ordered key space.
            let start = cursor as usize;
            let count = count.max(1);
            let window: Vec<&String> = store.data.keys().skip(start).take(count).collect();
            let next = if window.len() < count {
                0
            } else {
                (start + window.len()) as u64
            };
            let batch = window
                .into_iter()
                .filter(|k| glob_match(pattern.as_bytes(), k.as_bytes()))
                .cloned()
                .collect();
            Ok((next, batch))
        })
    }

    async fn expire(&mut self, key: &str, ttl: Duration) -> FaultResult<bool> {
        self.ensure_open()?;
        self.target.with_store(|store| {
            if !store.data.contains_key(key) {
                return Ok(false);
            }
            store.expiry.insert(key.to_string(), Instant::now() + ttl);
            Ok(true)
        })
    }

    async fn config_get(&mut self, name: &str) -> FaultResult<Option<String>> {
        self.ensure_open()?;
        self.target
            .with_store(|store| Ok(store.config.get(name).cloned()))
    }

    async fn config_set(&mut self, name: &str, value: &str) -> FaultResult<()> {
        self.ensure_open()?;
        self.target.with_store(|store| {
            if store.failing_config.contains(name) {
                return Err(FaultError::Target(format!(
                    "CONFIG SET {} rejected",
                    name
                )));
            }
            store.config.insert(name.to_string(), value.to_string());
            Ok(())
        })
    }

    async fn info(&mut self, _section: &str) -> FaultResult<InfoSection> {
        self.ensure_open()?;
        self.target.with_store(|store| {
            let mut info = InfoSection::new();
            info.insert("used_memory", store.used_memory().to_string());
            info.insert(
                "maxmemory",
                store.config.get(MAXMEMORY).cloned().unwrap_or_else(|| "0".into()),
            );
            info.insert("keyspace_hits", store.keyspace_hits.to_string());
            info.insert("keyspace_misses", store.keyspace_misses.to_string());
            info.insert("connected_clients", store.connected_clients.to_string());
            info.insert("maxclients", store.max_clients().to_string());
            info.insert("blocked_clients", store.blocked_clients.to_string());
            info.insert(
                "rdb_bgsave_in_progress",
                if store.bgsave_in_progress { "1" } else { "0" },
            );
            info.insert("rdb_last_save_time", store.last_save.to_string());
            info.insert("redis_mode", store.redis_mode.clone());
            match &store.role {
                Role::Master => {
                    info.insert("role", "master");
                    info.insert("connected_slaves", store.connected_replicas.to_string());
                }
                Role::Replica {
                    lag_seconds,
                    link_up,
                } => {
                    info.insert("role", "slave");
                    info.insert("master_last_io_seconds_ago", lag_seconds.to_string());
                    info.insert("master_link_status", if *link_up { "up" } else { "down" });
                }
            }
            Ok(info)
        })
    }

    async fn client_pause(&mut self, timeout: Duration, mode: PauseMode) -> FaultResult<()> {
        self.ensure_open()?;
        self.target.with_store(|store| {
            store.paused = Some((Instant::now() + timeout, mode));
            Ok(())
        })
    }

    async fn client_unpause(&mut self) -> FaultResult<()> {
        self.ensure_open()?;
        self.target.with_store(|store| {
            store.paused = None;
            Ok(())
        })
    }

    async fn bgsave(&mut self) -> FaultResult<String> {
        self.ensure_open()?;
        self.target.with_store(|store| {
            if store.bgsave_in_progress {
                return Err(FaultError::Target(
                    "Background save already in progress".into(),
                ));
            }
            // Saves complete instantly; LASTSAVE always moves forward.
            store.last_save = chrono::Utc::now().timestamp().max(store.last_save + 1);
            Ok("Background saving started".to_string())
        })
    }

    async fn last_save(&mut self) -> FaultResult<i64> {
        self.ensure_open()?;
        self.target.with_store(|store| Ok(store.last_save))
    }

    async fn debug_sleep(&mut self, duration: Duration) -> FaultResult<()> {
        self.ensure_open()?;
        self.target.with_store(|store| {
            if store.debug_disabled {
                return Err(FaultError::Target(
                    "DEBUG command not allowed".into(),
                ));
            }
            store.asleep_until = Some(Instant::now() + duration);
            Ok(())
        })
    }
}

/// Redis-style glob matching supporting `*`, `?` and `\` escapes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(b'?') => {
                p += 1;
                t += 1;
            }
            Some(b'\\') if p + 1 < pattern.len() && pattern[p + 1] == text[t] => {
                p += 2;
                t += 1;
            }
            Some(c) if *c != b'\\' && *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(target: &MemoryTarget) -> Box<dyn TargetHandle> {
        MemoryConnector::new(target.clone())
            .open(&TargetDescriptor::new("memory://test"))
            .await
            .unwrap()
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"user:*", b"user:42"));
        assert!(!glob_match(b"user:*", b"session:42"));
        assert!(glob_match(b"k?y", b"key"));
        assert!(glob_match(b"a*b*c", b"axxbyyc"));
        assert!(!glob_match(b"a*b*c", b"axxbyy"));
        assert!(glob_match(b"lit\\*", b"lit*"));
        assert!(!glob_match(b"lit\\*", b"litx"));
    }

    #[tokio::test]
    async fn test_get_tracks_hits_and_misses() {
        let target = MemoryTarget::new();
        let mut handle = open(&target).await;
        handle.set("k", b"v").await.unwrap();
        assert_eq!(handle.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(handle.get("missing").await.unwrap(), None);
        assert_eq!(target.keyspace_stats(), (1, 1));
    }

    #[tokio::test]
    async fn test_unreachable_refuses_connections() {
        let target = MemoryTarget::new();
        target.set_reachable(false);
        let err = MemoryConnector::new(target.clone())
            .open(&TargetDescriptor::new("memory://test"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FaultError::UnreachableTarget(_)));
        assert_eq!(target.connected_clients(), 0);
    }

    #[tokio::test]
    async fn test_operations_fail_after_target_goes_away() {
        let target = MemoryTarget::new();
        let mut handle = open(&target).await;
        target.set_reachable(false);
        assert!(matches!(
            handle.set("k", b"v").await,
            Err(FaultError::Target(_))
        ));
        assert!(matches!(
            handle.probe().await,
            Err(FaultError::UnreachableTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_client() {
        let target = MemoryTarget::new();
        let mut handle = open(&target).await;
        assert_eq!(target.connected_clients(), 1);
        handle.close().await;
        handle.close().await;
        assert_eq!(target.connected_clients(), 0);
        drop(handle);
        assert_eq!(target.connected_clients(), 0);
    }

    #[tokio::test]
    async fn test_dropped_handle_releases_client() {
        let target = MemoryTarget::new();
        let handle = open(&target).await;
        assert_eq!(target.connected_clients(), 1);
        drop(handle);
        assert_eq!(target.connected_clients(), 0);
    }

    #[tokio::test]
    async fn test_max_clients_enforced() {
        let target = MemoryTarget::new();
        let mut admin = open(&target).await;
        admin.config_set("maxclients", "2").await.unwrap();
        let _second = open(&target).await;
        let err = MemoryConnector::new(target.clone())
            .open(&TargetDescriptor::new("memory://test"))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("max number of clients"));
    }

    #[tokio::test]
    async fn test_fail_deletes_keeps_key() {
        let target = MemoryTarget::new();
        let mut handle = open(&target).await;
        handle.set("k", b"v").await.unwrap();
        target.fail_deletes(true);
        assert!(handle.delete("k").await.is_err());
        assert!(target.contains_key("k"));
        target.fail_deletes(false);
        assert!(handle.delete("k").await.unwrap());
        assert!(!handle.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_pages_through_keyspace() {
        let target = MemoryTarget::new();
        for i in 0..25 {
            target.insert(&format!("a:{:02}", i), b"x");
            target.insert(&format!("b:{:02}", i), b"x");
        }
        let mut handle = open(&target).await;
        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch) = handle.scan(cursor, "a:*", 10).await.unwrap();
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(found.len(), 25);
        assert!(found.iter().all(|k| k.starts_with("a:")));
    }

    #[tokio::test]
    async fn test_expire_removes_key_lazily() {
        let target = MemoryTarget::new();
        let mut handle = open(&target).await;
        handle.set("k", b"v").await.unwrap();
        assert!(handle.expire("k", Duration::from_millis(20)).await.unwrap());
        assert!(!handle.expire("nope", Duration::from_secs(1)).await.unwrap());
        assert!(target.ttl("k").is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!target.contains_key("k"));
    }

    #[tokio::test]
    async fn test_info_reports_replica_fields() {
        let target = MemoryTarget::new();
        target.set_replica(3, false);
        let mut handle = open(&target).await;
        let info = handle.info("replication").await.unwrap();
        assert_eq!(info.get("role"), Some("slave"));
        assert_eq!(info.int("master_last_io_seconds_ago"), Some(3));
        assert_eq!(info.get("master_link_status"), Some("down"));
    }

    #[tokio::test]
    async fn test_bgsave_rejected_while_in_progress() {
        let target = MemoryTarget::new();
        target.set_bgsave_in_progress(true);
        let mut handle = open(&target).await;
        assert!(handle.bgsave().await.is_err());
        target.set_bgsave_in_progress(false);
        assert!(handle.bgsave().await.unwrap().contains("started"));
    }

    #[tokio::test]
    async fn test_client_pause_and_unpause() {
        let target = MemoryTarget::new();
        let mut handle = open(&target).await;
        handle
            .client_pause(Duration::from_secs(5), PauseMode::Write)
            .await
            .unwrap();
        assert_eq!(target.paused(), Some(PauseMode::Write));
        handle.client_unpause().await.unwrap();
        assert_eq!(target.paused(), None);
    }

    #[tokio::test]
    async fn test_debug_sleep_blocks_until_it_expires() {
        let target = MemoryTarget::new();
        let mut handle = open(&target).await;
        handle.debug_sleep(Duration::from_millis(50)).await.unwrap();
        assert!(target.is_asleep());
        assert!(handle.probe().await.is_err());
        assert!(handle.get("k").await.is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!target.is_asleep());
        assert!(handle.probe().await.is_ok());
    }

    #[tokio::test]
    async fn test_debug_sleep_rejected_when_disabled() {
        let target = MemoryTarget::new();
        target.disable_debug(true);
        let mut handle = open(&target).await;
        let err = handle.debug_sleep(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("DEBUG command not allowed"));
        assert!(!target.is_asleep());
    }
}
