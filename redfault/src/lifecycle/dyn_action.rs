//! Type-erased actions.
//!
//! Protocol adapters (and the CLI) pick actions by id at runtime and carry
//! execution state as opaque JSON between calls.

use async_trait::async_trait;
use redfault_shared::errors::{FaultError, FaultResult};
use serde_json::Value;

use super::controller::{Action, ActionDescriptor, Lifecycle, StateOf};
use super::report::{ProgressReport, StartReport, StopReport};
use crate::target::TargetDescriptor;

/// Object-safe view of a [`Lifecycle`].
#[async_trait]
pub trait DynAction: Send + Sync {
    fn descriptor(&self) -> ActionDescriptor;

    fn prepare(&self, config: &Value, target: TargetDescriptor) -> FaultResult<Value>;

    async fn start(&self, state: &mut Value) -> FaultResult<StartReport>;

    async fn status(&self, state: &mut Value) -> FaultResult<ProgressReport>;

    async fn stop(&self, state: &mut Value) -> FaultResult<StopReport>;
}

fn decode<A: Action>(state: &Value) -> FaultResult<StateOf<A>> {
    serde_json::from_value(state.clone())
        .map_err(|e| FaultError::Validation(format!("malformed execution state: {}", e)))
}

fn encode<A: Action>(state: &StateOf<A>) -> FaultResult<Value> {
    serde_json::to_value(state)
        .map_err(|e| FaultError::Internal(format!("cannot encode execution state: {}", e)))
}

#[async_trait]
impl<A: Action> DynAction for Lifecycle<A> {
    fn descriptor(&self) -> ActionDescriptor {
        self.action().descriptor()
    }

    fn prepare(&self, config: &Value, target: TargetDescriptor) -> FaultResult<Value> {
        let state = Lifecycle::prepare(self, config, target)?;
        encode::<A>(&state)
    }

    async fn start(&self, state: &mut Value) -> FaultResult<StartReport> {
        let mut typed = decode::<A>(state)?;
        let result = Lifecycle::start(self, &mut typed).await;
        *state = encode::<A>(&typed)?;
        result
    }

    async fn status(&self, state: &mut Value) -> FaultResult<ProgressReport> {
        let mut typed = decode::<A>(state)?;
        let result = Lifecycle::status(self, &mut typed).await;
        *state = encode::<A>(&typed)?;
        result
    }

    async fn stop(&self, state: &mut Value) -> FaultResult<StopReport> {
        let mut typed = decode::<A>(state)?;
        let result = Lifecycle::stop(self, &mut typed).await;
        *state = encode::<A>(&typed)?;
        result
    }
}
