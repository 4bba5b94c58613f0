//! Tracing subscriber setup.
//!
//! Both initializers respect `RUST_LOG` and fall back to the given
//! directive. Installing a second subscriber is a silent no-op, so tests
//! and embedding hosts can call these freely.

use std::path::Path;

use redfault_shared::errors::{FaultError, FaultResult};
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

pub use tracing_appender::non_blocking::WorkerGuard;

/// Daily-rolling log file name inside the log directory.
pub const LOG_FILE_PREFIX: &str = "redfault.log";

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Log to stderr.
pub fn init_logging(default_directive: &str) {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter(default_directive))
        .try_init();
}

/// Log to stderr and to a daily-rolling file under `dir`.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init_file_logging(dir: &Path, default_directive: &str) -> FaultResult<WorkerGuard> {
    std::fs::create_dir_all(dir).map_err(|e| {
        FaultError::Config(format!("cannot create log dir {}: {}", dir.display(), e))
    })?;

    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    register_to_tracing(non_blocking, env_filter(default_directive));
    Ok(guard)
}

fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) {
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false),
        )
        .try_init();
}
