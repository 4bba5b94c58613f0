//! Shared constants for the engine, the actions and the CLI.

/// Timing defaults for the background execution engine.
///
/// Every wait in the engine is bounded by one of these values unless the
/// engine options override them.
pub mod timing {
    /// Delay before retrying after a failed tick.
    pub const TICK_BACKOFF_MS: u64 = 500;

    /// Upper bound for a single tick.
    pub const TICK_TIMEOUT_MS: u64 = 30_000;

    /// How long stop waits for a cancelled worker loop to reach its done state.
    pub const STOP_GRACE_MS: u64 = 300;

    /// Connection establishment timeout.
    pub const DIAL_TIMEOUT_MS: u64 = 5_000;

    /// Timeout for a single target operation.
    pub const OP_TIMEOUT_MS: u64 = 3_000;

    /// How long injected state is kept alive within one tick before reverting it.
    pub const HOLD_MS: u64 = 500;

    /// Pause between create/delete cycles.
    pub const CYCLE_PAUSE_MS: u64 = 100;

    /// Interval between keepalive pings on held connections.
    pub const KEEPALIVE_INTERVAL_MS: u64 = 10_000;
}

/// Naming of temporary artifacts created on the target.
pub mod artifacts {
    /// Prefix shared by every temporary key written by an execution.
    pub const KEY_PREFIX: &str = "redfault";

    /// SCAN batch size used by enumerative cleanup.
    pub const SCAN_BATCH: usize = 100;
}

/// Configuration parameter names and sentinels.
pub mod config {
    /// Value meaning "leave this setting untouched".
    pub const KEEP_SENTINEL: &str = "keep";

    /// Memory limit parameter.
    pub const MAXMEMORY: &str = "maxmemory";

    /// Eviction policy parameter.
    pub const MAXMEMORY_POLICY: &str = "maxmemory-policy";
}

/// Environment variables read at process start.
pub mod envs {
    /// Prefix for engine option overrides (`REDFAULT_STOP_GRACE_MS`, ...).
    pub const OPTION_PREFIX: &str = "REDFAULT_";

    /// JSON array of known endpoints.
    pub const ENDPOINTS_JSON: &str = "REDFAULT_ENDPOINTS_JSON";
}
