//! Redfault - fault injection and health checks for Redis-compatible data stores
//!
//! The crate is layered bottom-up:
//!
//! - [`target`]: connectors and handles for the data store under test
//! - [`engine`]: detached background executions with bounded cancellation
//!   and best-effort cleanup
//! - [`lifecycle`]: the prepare / start / status / stop protocol every
//!   action follows
//! - [`actions`]: the concrete attacks and checks
//!
//! ```no_run
//! use std::sync::Arc;
//! use redfault::{DynAction, Engine, EngineOptions, RoutingConnector, actions};
//! use redfault::target::{MemoryTarget, RedisConnector, TargetDescriptor};
//! use serde_json::json;
//!
//! # async fn demo() -> redfault::FaultResult<()> {
//! let connector = RoutingConnector::new(RedisConnector::default(), MemoryTarget::new());
//! let engine = Engine::new(Arc::new(connector), EngineOptions::default());
//! let latency = actions::find(&engine, "latency").expect("registered");
//!
//! let mut state = latency.prepare(
//!     &json!({"duration": 10_000, "max_latency_ms": 50}),
//!     TargetDescriptor::new("redis://localhost:6379"),
//! )?;
//! latency.start(&mut state).await?;
//! let progress = latency.status(&mut state).await?;
//! let summary = latency.stop(&mut state).await?;
//! # let _ = (progress, summary);
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod logging;
pub mod target;

pub use config::{EngineOptions, Endpoint, Endpoints, Settings};
pub use engine::{ExecutionKey, ExecutionRegistry, ExecutionSnapshot, RunningExecution};
pub use lifecycle::{
    Action, ActionDescriptor, ActionKind, DynAction, Engine, Lifecycle, Phase, ProgressReport,
    StartReport, StopReport,
};
pub use redfault_shared::{FaultError, FaultResult};
pub use target::{RoutingConnector, TargetConnector, TargetDescriptor};
