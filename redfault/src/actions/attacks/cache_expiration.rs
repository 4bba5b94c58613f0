//! One-shot TTL on matching keys, forcing them to expire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redfault_shared::errors::FaultResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::common::{clamp, parse_config, require};
use crate::engine::NoCleanup;
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};
use crate::target::scan_matching;

#[derive(Debug, Deserialize)]
struct RawConfig {
    pattern: Option<String>,
    max_keys: Option<i64>,
    ttl_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheExpirationParams {
    pub pattern: String,
    /// 0 expires every match.
    pub max_keys: u64,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheExpirationOutputs {
    pub matched: u64,
    pub expired: u64,
}

pub struct CacheExpiration;

#[async_trait]
impl Action for CacheExpiration {
    type Params = CacheExpirationParams;
    type Outputs = CacheExpirationOutputs;

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "cache-expiration",
            label: "Cache Expiration",
            kind: ActionKind::Attack,
            description: "Sets a TTL on keys matching a pattern to force them to expire",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<CacheExpirationParams> {
        let raw: RawConfig = parse_config("cache-expiration", config)?;
        Ok(CacheExpirationParams {
            pattern: require("pattern", raw.pattern)?,
            max_keys: clamp(raw.max_keys, 0, 0, u32::MAX as u64),
            ttl_seconds: clamp(raw.ttl_seconds, 10, 1, u32::MAX as u64),
        })
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let tunables = state.params.tunables.clone();
        let ttl = Duration::from_secs(tunables.ttl_seconds);
        let mut handle = engine.preflight(&state.params.target).await?;

        let keys = match scan_matching(handle.as_mut(), &tunables.pattern, tunables.max_keys as usize).await {
            Ok(keys) => keys,
            Err(e) => {
                handle.close().await;
                return Err(e);
            }
        };
        let mut expired = 0u64;
        for key in &keys {
            match handle.expire(key, ttl).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "Failed to set TTL"),
            }
        }
        handle.close().await;

        let execution = engine.launch_idle(&state.params, Arc::new(NoCleanup))?;
        execution.add_created(expired);
        state.outputs.matched = keys.len() as u64;
        state.outputs.expired = expired;

        let message = if keys.is_empty() {
            Message::warn(format!("no keys found matching pattern '{}'", tunables.pattern))
        } else {
            Message::info(format!(
                "set a TTL of {} s on {} keys matching pattern '{}'",
                tunables.ttl_seconds, expired, tunables.pattern
            ))
        };
        Ok(StartReport::with_message(message))
    }

    async fn status(&self, _engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        report.metric("keys_expired", state.outputs.expired as f64);
    }
}
