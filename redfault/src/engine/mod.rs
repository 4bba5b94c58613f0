//! Background execution engine.
//!
//! - [`registry`]: process-wide table of live executions
//! - [`running`]: cancellation control and counters of one execution
//! - [`worker`]: the detached tick loop and its supervisor
//! - [`cleanup`]: best-effort reconciliation steps

pub mod cleanup;
pub mod key;
pub mod params;
pub mod registry;
pub mod running;
pub mod worker;

pub use cleanup::{
    Cleanup, CleanupError, CleanupReport, ConfigField, ConfigRestore, HeldHandles,
    NoCleanup, PrefixSweep, ReleaseHandles,
};
pub use key::ExecutionKey;
pub use params::ExecutionParameters;
pub use registry::ExecutionRegistry;
pub use running::{ExecutionSnapshot, RunningExecution};
pub use worker::{Idle, Tick, TickContext, TickOutcome, WorkerOptions, spawn_workers};
