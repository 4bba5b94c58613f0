//! Redfault Shared - common code for the engine, actions and CLI
//!
//! This crate contains the error taxonomy and the protocol constants
//! (timing defaults, artifact naming, sentinels) used by every redfault crate.

pub mod constants;
pub mod errors;

pub use errors::{FaultError, FaultResult};
