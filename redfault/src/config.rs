//! Configuration for redfault.

use std::time::Duration;

use redfault_shared::constants::envs as const_envs;
use redfault_shared::constants::timing;
use redfault_shared::errors::{FaultError, FaultResult};
use serde::{Deserialize, Serialize};

use crate::target::TargetDescriptor;

// ============================================================================
// Engine Options
// ============================================================================

/// Timing knobs for the execution engine.
///
/// Every field can be overridden by `REDFAULT_<FIELD>` in upper case,
/// e.g. `REDFAULT_STOP_GRACE_MS=500`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// How long stop waits for a cancelled worker loop before cleaning up anyway.
    ///
    /// Default: 300
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Fixed delay after a failed tick.
    ///
    /// Default: 500
    #[serde(default = "default_tick_backoff_ms")]
    pub tick_backoff_ms: u64,

    /// Upper bound on a single tick. A tick exceeding it counts as failed.
    ///
    /// Default: 30000
    #[serde(default = "default_tick_timeout_ms")]
    pub tick_timeout_ms: u64,

    /// Connection establishment timeout.
    ///
    /// Default: 5000
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    /// Timeout for a single target operation.
    ///
    /// Default: 3000
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,

    /// How long injected state is held within one tick before reverting it.
    ///
    /// Default: 500
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,

    /// Interval between keepalive pings on held connections.
    ///
    /// Default: 10000
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
}

fn default_stop_grace_ms() -> u64 {
    timing::STOP_GRACE_MS
}

fn default_tick_backoff_ms() -> u64 {
    timing::TICK_BACKOFF_MS
}

fn default_tick_timeout_ms() -> u64 {
    timing::TICK_TIMEOUT_MS
}

fn default_dial_timeout_ms() -> u64 {
    timing::DIAL_TIMEOUT_MS
}

fn default_op_timeout_ms() -> u64 {
    timing::OP_TIMEOUT_MS
}

fn default_hold_ms() -> u64 {
    timing::HOLD_MS
}

fn default_keepalive_interval_ms() -> u64 {
    timing::KEEPALIVE_INTERVAL_MS
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            stop_grace_ms: default_stop_grace_ms(),
            tick_backoff_ms: default_tick_backoff_ms(),
            tick_timeout_ms: default_tick_timeout_ms(),
            dial_timeout_ms: default_dial_timeout_ms(),
            op_timeout_ms: default_op_timeout_ms(),
            hold_ms: default_hold_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
        }
    }
}

impl EngineOptions {
    /// Load options from the process environment.
    pub fn from_env() -> FaultResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load options through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> FaultResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        let fields: [(&str, &mut u64); 7] = [
            ("STOP_GRACE_MS", &mut options.stop_grace_ms),
            ("TICK_BACKOFF_MS", &mut options.tick_backoff_ms),
            ("TICK_TIMEOUT_MS", &mut options.tick_timeout_ms),
            ("DIAL_TIMEOUT_MS", &mut options.dial_timeout_ms),
            ("OP_TIMEOUT_MS", &mut options.op_timeout_ms),
            ("HOLD_MS", &mut options.hold_ms),
            ("KEEPALIVE_INTERVAL_MS", &mut options.keepalive_interval_ms),
        ];

        for (suffix, slot) in fields {
            let name = format!("{}{}", const_envs::OPTION_PREFIX, suffix);
            if let Some(raw) = lookup(&name) {
                *slot = raw.trim().parse().map_err(|_| {
                    FaultError::Config(format!(
                        "{} must be a non-negative integer, got '{}'",
                        name, raw
                    ))
                })?;
            }
        }

        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> FaultResult<()> {
        if self.tick_timeout_ms == 0 {
            return Err(FaultError::Config("tick_timeout_ms must be > 0".into()));
        }
        if self.keepalive_interval_ms == 0 {
            return Err(FaultError::Config(
                "keepalive_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn tick_backoff(&self) -> Duration {
        Duration::from_millis(self.tick_backoff_ms)
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_millis(self.tick_timeout_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

// ============================================================================
// Endpoints
// ============================================================================

/// A known data-store endpoint with stored credentials.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub db: i64,

    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Display name. Defaults to the URL host.
    #[serde(default)]
    pub name: Option<String>,
}

impl Endpoint {
    pub fn descriptor(&self) -> TargetDescriptor {
        TargetDescriptor {
            url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            db: self.db,
            insecure_skip_verify: self.insecure_skip_verify,
        }
    }
}

/// Endpoints configured for this process.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoints(Vec<Endpoint>);

impl Endpoints {
    pub fn new(endpoints: Vec<Endpoint>) -> FaultResult<Self> {
        for (index, endpoint) in endpoints.iter().enumerate() {
            if endpoint.url.trim().is_empty() {
                return Err(FaultError::Config(format!(
                    "endpoint {} has an empty url",
                    index
                )));
            }
        }
        Ok(Self(endpoints))
    }

    /// Parse the JSON array format of `REDFAULT_ENDPOINTS_JSON`.
    pub fn from_json(raw: &str) -> FaultResult<Self> {
        let endpoints: Vec<Endpoint> = serde_json::from_str(raw)
            .map_err(|e| FaultError::Config(format!("{}: {}", const_envs::ENDPOINTS_JSON, e)))?;
        Self::new(endpoints)
    }

    pub fn from_env() -> FaultResult<Self> {
        match std::env::var(const_envs::ENDPOINTS_JSON) {
            Ok(raw) if !raw.trim().is_empty() => Self::from_json(&raw),
            _ => Ok(Self::default()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fill in stored credentials for a target whose URL (or name) matches
    /// a configured endpoint. Explicit values on the target win.
    pub fn resolve(&self, target: &TargetDescriptor) -> TargetDescriptor {
        let found = self.0.iter().find(|e| {
            e.url == target.url || e.name.as_deref() == Some(target.url.as_str())
        });
        let Some(endpoint) = found else {
            return target.clone();
        };

        TargetDescriptor {
            url: endpoint.url.clone(),
            username: target.username.clone().or_else(|| endpoint.username.clone()),
            password: target.password.clone().or_else(|| endpoint.password.clone()),
            db: if target.db != 0 { target.db } else { endpoint.db },
            insecure_skip_verify: target.insecure_skip_verify || endpoint.insecure_skip_verify,
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Everything configurable from the environment.
#[derive(Clone, Debug, Default)]
pub struct Settings {
    pub endpoints: Endpoints,
    pub engine: EngineOptions,
}

impl Settings {
    pub fn from_env() -> FaultResult<Self> {
        Ok(Self {
            endpoints: Endpoints::from_env()?,
            engine: EngineOptions::from_env()?,
        })
    }
}
