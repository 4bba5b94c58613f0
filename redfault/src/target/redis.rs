//! Redis-compatible targets over the `redis` crate.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{ConnectionAddr, ConnectionInfo, FromRedisValue, IntoConnectionInfo};
use redfault_shared::constants::timing::{DIAL_TIMEOUT_MS, OP_TIMEOUT_MS};
use redfault_shared::errors::{FaultError, FaultResult};

use super::info::{InfoSection, parse_info};
use super::{PauseMode, TargetConnector, TargetDescriptor, TargetHandle};

/// Opens one dedicated connection per handle.
#[derive(Clone, Debug)]
pub struct RedisConnector {
    dial_timeout: Duration,
    op_timeout: Duration,
}

impl Default for RedisConnector {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DIAL_TIMEOUT_MS),
            Duration::from_millis(OP_TIMEOUT_MS),
        )
    }
}

impl RedisConnector {
    pub fn new(dial_timeout: Duration, op_timeout: Duration) -> Self {
        Self {
            dial_timeout,
            op_timeout,
        }
    }
}

/// Build connection info from a descriptor.
///
/// Explicit credentials and database override whatever the URL carries.
fn connection_info(target: &TargetDescriptor) -> FaultResult<ConnectionInfo> {
    let mut info = target.url.as_str().into_connection_info().map_err(|e| {
        FaultError::Validation(format!("invalid target url for {}: {}", target.identity(), e))
    })?;

    if target.db != 0 {
        info.redis.db = target.db;
    }
    if let Some(username) = &target.username {
        info.redis.username = Some(username.clone());
    }
    if let Some(password) = &target.password {
        info.redis.password = Some(password.clone());
    }
    if target.insecure_skip_verify {
        if let ConnectionAddr::TcpTls { insecure, .. } = &mut info.addr {
            *insecure = true;
        }
    }
    Ok(info)
}

#[async_trait]
impl TargetConnector for RedisConnector {
    async fn open(&self, target: &TargetDescriptor) -> FaultResult<Box<dyn TargetHandle>> {
        let info = connection_info(target)?;
        let client = redis::Client::open(info)
            .map_err(|e| FaultError::Validation(format!("{}: {}", target.identity(), e)))?;

        let conn = match tokio::time::timeout(
            self.dial_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                return Err(FaultError::UnreachableTarget(format!(
                    "{}: {}",
                    target.identity(),
                    e
                )));
            }
            Err(_) => {
                return Err(FaultError::UnreachableTarget(format!(
                    "{}: dial timed out after {:?}",
                    target.identity(),
                    self.dial_timeout
                )));
            }
        };

        tracing::trace!(target_identity = %target.identity(), "Opened redis connection");
        Ok(Box::new(RedisHandle {
            conn: Some(conn),
            op_timeout: self.op_timeout,
        }))
    }
}

struct RedisHandle {
    conn: Option<MultiplexedConnection>,
    op_timeout: Duration,
}

impl RedisHandle {
    /// Run one command bounded by the operation timeout.
    async fn query<T: FromRedisValue>(&mut self, name: &str, cmd: redis::Cmd) -> FaultResult<T> {
        let op_timeout = self.op_timeout;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| FaultError::Target(format!("{}: handle is closed", name)))?;

        match tokio::time::timeout(op_timeout, cmd.query_async(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(FaultError::Target(format!("{}: {}", name, e))),
            Err(_) => Err(FaultError::Target(format!(
                "{}: timed out after {:?}",
                name, op_timeout
            ))),
        }
    }
}

#[async_trait]
impl TargetHandle for RedisHandle {
    async fn probe(&mut self) -> FaultResult<Duration> {
        let started = Instant::now();
        let reply: String = self
            .query("PING", redis::cmd("PING"))
            .await
            .map_err(|e| FaultError::UnreachableTarget(e.to_string()))?;
        let elapsed = started.elapsed();
        if reply != "PONG" {
            return Err(FaultError::UnreachableTarget(format!(
                "unexpected PING reply: {}",
                reply
            )));
        }
        Ok(elapsed)
    }

    async fn close(&mut self) {
        // Dropping the multiplexed connection stops its driver task.
        self.conn.take();
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> FaultResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        self.query("SET", cmd).await
    }

    async fn get(&mut self, key: &str) -> FaultResult<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query("GET", cmd).await
    }

    async fn delete(&mut self, key: &str) -> FaultResult<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: i64 = self.query("DEL", cmd).await?;
        Ok(removed > 0)
    }

    async fn scan(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> FaultResult<(u64, Vec<String>)> {
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count);
        self.query("SCAN", cmd).await
    }

    async fn expire(&mut self, key: &str, ttl: Duration) -> FaultResult<bool> {
        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(key).arg(ttl.as_millis() as u64);
        let applied: i64 = self.query("PEXPIRE", cmd).await?;
        Ok(applied == 1)
    }

    async fn config_get(&mut self, name: &str) -> FaultResult<Option<String>> {
        let mut cmd = redis::cmd("CONFIG");
        cmd.arg("GET").arg(name);
        // RESP2 reply: [name, value]
        let reply: Vec<String> = self.query("CONFIG GET", cmd).await?;
        Ok(reply.into_iter().nth(1))
    }

    async fn config_set(&mut self, name: &str, value: &str) -> FaultResult<()> {
        let mut cmd = redis::cmd("CONFIG");
        cmd.arg("SET").arg(name).arg(value);
        self.query("CONFIG SET", cmd).await
    }

    async fn info(&mut self, section: &str) -> FaultResult<InfoSection> {
        let mut cmd = redis::cmd("INFO");
        cmd.arg(section);
        let raw: String = self.query("INFO", cmd).await?;
        Ok(parse_info(&raw))
    }

    async fn client_pause(&mut self, timeout: Duration, mode: PauseMode) -> FaultResult<()> {
        let mut cmd = redis::cmd("CLIENT");
        cmd.arg("PAUSE")
            .arg(timeout.as_millis() as u64)
            .arg(mode.as_str());
        self.query("CLIENT PAUSE", cmd).await
    }

    async fn client_unpause(&mut self) -> FaultResult<()> {
        let mut cmd = redis::cmd("CLIENT");
        cmd.arg("UNPAUSE");
        self.query("CLIENT UNPAUSE", cmd).await
    }

    async fn bgsave(&mut self) -> FaultResult<String> {
        self.query("BGSAVE", redis::cmd("BGSAVE")).await
    }

    async fn last_save(&mut self) -> FaultResult<i64> {
        self.query("LASTSAVE", redis::cmd("LASTSAVE")).await
    }

    async fn debug_sleep(&mut self, duration: Duration) -> FaultResult<()> {
        let mut cmd = redis::cmd("DEBUG");
        cmd.arg("SLEEP").arg(duration.as_secs());

        let op_timeout = self.op_timeout;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| FaultError::Target("DEBUG SLEEP: handle is closed".into()))?;
        let sent: Result<redis::RedisResult<()>, _> =
            tokio::time::timeout(op_timeout, cmd.query_async(conn)).await;
        match sent {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(FaultError::Target(format!("DEBUG SLEEP: {}", e))),
            // The reply only arrives once the sleep is over.
            Err(_) => {
                tracing::debug!(?duration, "DEBUG SLEEP accepted, server stopped answering");
                Ok(())
            }
        }
    }
}
