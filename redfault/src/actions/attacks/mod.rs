//! Fault injections.

mod bgsave;
mod big_key;
mod cache_expiration;
mod cache_penetration;
mod client_pause;
mod connection_exhaustion;
mod key_delete;
mod maxmemory_limit;
mod memory_fill;
mod sentinel_stop;

pub use bgsave::{Bgsave, BgsaveOutputs};
pub use big_key::{BigKey, BigKeyOutputs, BigKeyParams};
pub use cache_expiration::{CacheExpiration, CacheExpirationOutputs, CacheExpirationParams};
pub use cache_penetration::{CachePenetration, CachePenetrationParams};
pub use client_pause::{ClientPause, ClientPauseParams};
pub use connection_exhaustion::{
    ConnectionExhaustion, ConnectionExhaustionOutputs, ConnectionExhaustionParams,
};
pub use key_delete::{KeyDelete, KeyDeleteOutputs, KeyDeleteParams};
pub use maxmemory_limit::{MaxmemoryLimit, MaxmemoryLimitOutputs, MaxmemoryLimitParams};
pub use memory_fill::{MemoryFill, MemoryFillOutputs, MemoryFillParams};
pub use sentinel_stop::{SentinelStop, SentinelStopOutputs};
