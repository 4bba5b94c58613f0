//! Prepare / start / status / stop protocol.

mod controller;
mod dyn_action;
mod engine;
mod report;
mod state;

pub use controller::{Action, ActionDescriptor, ActionKind, Lifecycle, StateOf, parse_duration};
pub use dyn_action::DynAction;
pub use engine::{Engine, Halted};
pub use report::{Level, Message, Metric, ProgressReport, StartReport, StopReport};
pub use state::{ExecutionState, Phase};
