//! Error taxonomy for fault executions.
//!
//! Errors are categorized by where in the execution life cycle they surface:
//! - [`FaultError::Validation`]: malformed prepare input (never retried)
//! - [`FaultError::UnreachableTarget`]: pre-flight probe failed at start
//! - [`FaultError::Target`]: a single operation against the target failed
//!   (inside a worker loop this is a tick error; it is counted, never propagated)
//! - [`FaultError::DuplicateKey`]: registry invariant violation
//! - [`FaultError::InvalidState`]: life-cycle call out of order

use thiserror::Error;

/// Result alias used across all redfault crates.
pub type FaultResult<T> = Result<T, FaultError>;

/// Errors that can occur while preparing, running or stopping an execution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FaultError {
    /// Missing or malformed prepare input.
    #[error("validation: {0}")]
    Validation(String),

    /// The target did not answer the pre-flight reachability probe.
    #[error("target unreachable: {0}")]
    UnreachableTarget(String),

    /// An operation against the target failed.
    #[error("target operation failed: {0}")]
    Target(String),

    /// An execution with this key is already registered.
    #[error("execution {0} already registered")]
    DuplicateKey(String),

    /// Life-cycle call does not match the current phase.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Engine or endpoint configuration is invalid.
    #[error("config: {0}")]
    Config(String),

    /// Unexpected internal failure.
    #[error("internal: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for FaultError {
    fn from(err: serde_json::Error) -> Self {
        FaultError::Validation(err.to_string())
    }
}
