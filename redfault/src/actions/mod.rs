//! Fault injections and health checks against Redis-compatible targets.
//!
//! Every action is driven through [`Lifecycle`]; [`catalog`] exposes them
//! all as [`DynAction`]s for callers that select by id.

pub mod attacks;
pub mod checks;
mod common;

use std::sync::Arc;

use crate::lifecycle::{DynAction, Engine, Lifecycle};

/// Every action, attacks first, bound to `engine`.
pub fn catalog(engine: &Engine) -> Vec<Arc<dyn DynAction>> {
    let e = || engine.clone();
    vec![
        Arc::new(Lifecycle::new(attacks::BigKey, e())),
        Arc::new(Lifecycle::new(attacks::MemoryFill, e())),
        Arc::new(Lifecycle::new(attacks::CachePenetration, e())),
        Arc::new(Lifecycle::new(attacks::ConnectionExhaustion, e())),
        Arc::new(Lifecycle::new(attacks::MaxmemoryLimit, e())),
        Arc::new(Lifecycle::new(attacks::ClientPause, e())),
        Arc::new(Lifecycle::new(attacks::KeyDelete, e())),
        Arc::new(Lifecycle::new(attacks::CacheExpiration, e())),
        Arc::new(Lifecycle::new(attacks::Bgsave, e())),
        Arc::new(Lifecycle::new(attacks::SentinelStop, e())),
        Arc::new(Lifecycle::new(checks::Latency, e())),
        Arc::new(Lifecycle::new(checks::Memory, e())),
        Arc::new(Lifecycle::new(checks::HitRate, e())),
        Arc::new(Lifecycle::new(checks::Connections, e())),
        Arc::new(Lifecycle::new(checks::Replication, e())),
        Arc::new(Lifecycle::new(checks::BlockedClients, e())),
    ]
}

/// Look up one action by id.
pub fn find(engine: &Engine, id: &str) -> Option<Arc<dyn DynAction>> {
    catalog(engine).into_iter().find(|a| a.descriptor().id == id)
}
