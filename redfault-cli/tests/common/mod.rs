#![allow(dead_code)]

use assert_cmd::Command;
use std::time::Duration;

/// Served in-process by every CLI invocation, so tests need no server.
pub const MEMORY_TARGET: &str = "memory://cli-test:6379";

/// A `redfault` command with a timeout and no inherited configuration.
pub fn redfault() -> Command {
    let bin_path = env!("CARGO_BIN_EXE_redfault");
    let mut cmd = Command::new(bin_path);
    // You can override this with .timeout(Duration::from_secs(N))
    cmd.timeout(Duration::from_secs(30));
    cmd.env_remove("RUST_LOG")
        .env_remove("REDFAULT_TARGET")
        .env_remove("REDFAULT_ENDPOINTS_JSON")
        .env_remove("REDFAULT_LOG_DIR");
    cmd
}

/// `redfault run <action>` against the in-memory target with a short window.
pub fn run(action: &str, duration: &str) -> Command {
    let mut cmd = redfault();
    cmd.args([
        "run",
        action,
        "--target",
        MEMORY_TARGET,
        "--duration",
        duration,
        "--poll",
        "50ms",
    ]);
    cmd
}
