//! Target client provider.
//!
//! The engine never speaks a wire protocol itself. It opens a
//! [`TargetHandle`] through a [`TargetConnector`] and issues opaque
//! operations on it. Each tick (or each pooled tick-worker) owns its handle
//! exclusively; handles are never shared across ticks or executions.
//!
//! # Implementations
//!
//! - [`RedisConnector`]: real Redis-compatible servers (`redis://`, `rediss://`)
//! - [`MemoryConnector`]: in-process simulated store (`memory://`), used by
//!   tests and dry runs
//! - [`RoutingConnector`]: picks one of the above by URL scheme

pub mod info;
pub mod memory;
pub mod redis;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redfault_shared::constants::artifacts::SCAN_BATCH;
use redfault_shared::errors::{FaultError, FaultResult};
use serde::{Deserialize, Serialize};

pub use self::info::{InfoSection, parse_info};
pub use self::memory::{MemoryConnector, MemoryTarget};
pub use self::redis::RedisConnector;

// ============================================================================
// Target descriptor
// ============================================================================

/// Connection parameters for one target service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Connection URL (`redis://`, `rediss://` or `memory://`).
    pub url: String,

    /// ACL username (Redis 6+).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password, overrides any password embedded in the URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Logical database index.
    #[serde(default)]
    pub db: i64,

    /// Skip TLS certificate verification for `rediss://`.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl TargetDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// URL scheme in lowercase, e.g. `redis`.
    pub fn scheme(&self) -> Option<String> {
        self.url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
    }

    /// Credential-free identity of the target: `host:port/db`.
    ///
    /// Used to derive execution keys, so it never contains secrets.
    pub fn identity(&self) -> String {
        let rest = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        // Drop userinfo, path and fragment.
        let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
        let host = authority.rsplit('@').next().unwrap_or(authority);
        format!("{}/{}", host, self.db)
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// `CLIENT PAUSE` mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PauseMode {
    /// Pause every client command.
    All,
    /// Pause only write commands.
    Write,
}

impl PauseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseMode::All => "ALL",
            PauseMode::Write => "WRITE",
        }
    }
}

/// Factory for target handles.
#[async_trait]
pub trait TargetConnector: Send + Sync {
    /// Open a new handle.
    ///
    /// # Errors
    ///
    /// - [`FaultError::UnreachableTarget`] if the connection cannot be established
    /// - [`FaultError::Validation`] if the descriptor is malformed
    async fn open(&self, target: &TargetDescriptor) -> FaultResult<Box<dyn TargetHandle>>;
}

/// One exclusive client connection to a target.
///
/// Every operation returns `FaultError::Target` on failure, except
/// [`probe`](TargetHandle::probe) which reports `UnreachableTarget`.
#[async_trait]
pub trait TargetHandle: Send {
    /// Cheap reachability check. Returns the round-trip time.
    async fn probe(&mut self) -> FaultResult<Duration>;

    /// Close the handle. Idempotent.
    async fn close(&mut self);

    async fn set(&mut self, key: &str, value: &[u8]) -> FaultResult<()>;

    async fn get(&mut self, key: &str) -> FaultResult<Option<Vec<u8>>>;

    /// Delete a key. Returns `false` if it did not exist.
    async fn delete(&mut self, key: &str) -> FaultResult<bool>;

    /// One SCAN step. Returns the next cursor (0 when done) and a batch of keys.
    async fn scan(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> FaultResult<(u64, Vec<String>)>;

    /// Set a TTL. Returns `false` if the key did not exist.
    async fn expire(&mut self, key: &str, ttl: Duration) -> FaultResult<bool>;

    async fn config_get(&mut self, name: &str) -> FaultResult<Option<String>>;

    async fn config_set(&mut self, name: &str, value: &str) -> FaultResult<()>;

    /// `INFO <section>` parsed into key/value pairs.
    async fn info(&mut self, section: &str) -> FaultResult<InfoSection>;

    async fn client_pause(&mut self, timeout: Duration, mode: PauseMode) -> FaultResult<()>;

    async fn client_unpause(&mut self) -> FaultResult<()>;

    /// Trigger a background save. Returns the server's reply text.
    async fn bgsave(&mut self) -> FaultResult<String>;

    /// Unix timestamp of the last successful save.
    async fn last_save(&mut self) -> FaultResult<i64>;

    /// `DEBUG SLEEP`: block the server's event loop for `duration`.
    ///
    /// Returns once the command is accepted. A server that stays silent past
    /// the operation timeout is taken to be asleep.
    async fn debug_sleep(&mut self, duration: Duration) -> FaultResult<()>;
}

/// Iterate SCAN to completion, stopping early once `limit` keys are collected
/// (`0` means no limit).
pub async fn scan_matching(
    handle: &mut dyn TargetHandle,
    pattern: &str,
    limit: usize,
) -> FaultResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut cursor = 0u64;
    loop {
        let (next, batch) = handle.scan(cursor, pattern, SCAN_BATCH).await?;
        keys.extend(batch);
        if limit > 0 && keys.len() >= limit {
            keys.truncate(limit);
            break;
        }
        if next == 0 {
            break;
        }
        cursor = next;
    }
    Ok(keys)
}

// ============================================================================
// Routing connector
// ============================================================================

/// Connector that dispatches on the URL scheme.
///
/// `redis://` and `rediss://` go to the Redis connector, `memory://` to one
/// shared in-process target.
#[derive(Clone)]
pub struct RoutingConnector {
    redis: Arc<RedisConnector>,
    memory: MemoryConnector,
}

impl RoutingConnector {
    pub fn new(redis: RedisConnector, memory: MemoryTarget) -> Self {
        Self {
            redis: Arc::new(redis),
            memory: MemoryConnector::new(memory),
        }
    }

    /// The in-process target served for `memory://` URLs.
    pub fn memory_target(&self) -> &MemoryTarget {
        self.memory.target()
    }
}

#[async_trait]
impl TargetConnector for RoutingConnector {
    async fn open(&self, target: &TargetDescriptor) -> FaultResult<Box<dyn TargetHandle>> {
        match target.scheme().as_deref() {
            Some("redis") | Some("rediss") => self.redis.open(target).await,
            Some("memory") => self.memory.open(target).await,
            Some(other) => Err(FaultError::Validation(format!(
                "unsupported target scheme '{}' in {}",
                other,
                target.identity()
            ))),
            None => Err(FaultError::Validation(format!(
                "target url '{}' has no scheme",
                target.identity()
            ))),
        }
    }
}
