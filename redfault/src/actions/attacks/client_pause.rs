//! Server-side client pause for the rest of the window.

use std::sync::Arc;

use async_trait::async_trait;
use redfault_shared::errors::{FaultError, FaultResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::common::parse_config;
use crate::engine::{Cleanup, CleanupReport};
use crate::lifecycle::{
    Action, ActionDescriptor, ActionKind, Engine, Message, ProgressReport, StartReport, StateOf,
};
use crate::target::{PauseMode, TargetConnector, TargetDescriptor};

#[derive(Debug, Deserialize)]
struct RawConfig {
    pause_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientPauseParams {
    pub pause_mode: PauseMode,
}

pub struct ClientPause;

/// Lifts the pause early. Unpausing an unpaused server is harmless.
struct ClientUnpause {
    connector: Arc<dyn TargetConnector>,
    target: TargetDescriptor,
}

#[async_trait]
impl Cleanup for ClientUnpause {
    async fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::new();
        let result = match self.connector.open(&self.target).await {
            Ok(mut handle) => {
                let result = handle.client_unpause().await;
                handle.close().await;
                result
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => report.ok(1),
            Err(e) => report.fail("client unpause", e),
        }
        report
    }
}

fn parse_mode(raw: Option<&str>) -> PauseMode {
    match raw.map(|m| m.trim().to_ascii_uppercase()).as_deref() {
        Some("WRITE") => PauseMode::Write,
        _ => PauseMode::All,
    }
}

#[async_trait]
impl Action for ClientPause {
    type Params = ClientPauseParams;
    type Outputs = ();

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            id: "client-pause",
            label: "Client Pause",
            kind: ActionKind::Attack,
            description: "Suspends client command processing for the duration of the attack",
        }
    }

    fn prepare(&self, config: &Value) -> FaultResult<ClientPauseParams> {
        let raw: RawConfig = parse_config("client-pause", config)?;
        Ok(ClientPauseParams {
            pause_mode: parse_mode(raw.pause_mode.as_deref()),
        })
    }

    async fn start(&self, engine: &Engine, state: &mut StateOf<Self>) -> FaultResult<StartReport> {
        let window = state.params.remaining();
        if window.is_zero() {
            return Err(FaultError::Validation(
                "pause duration must be greater than zero".into(),
            ));
        }

        let mode = state.params.tunables.pause_mode;
        let mut handle = engine.preflight(&state.params.target).await?;
        let paused = handle.client_pause(window, mode).await;
        handle.close().await;
        paused?;

        let unpause = Arc::new(ClientUnpause {
            connector: engine.connector(),
            target: state.params.target.clone(),
        });
        if let Err(e) = engine.launch_idle(&state.params, unpause.clone()) {
            unpause.cleanup().await;
            return Err(e);
        }

        Ok(StartReport::with_message(Message::info(format!(
            "paused clients (mode: {}) for {} ms",
            mode.as_str(),
            window.as_millis()
        ))))
    }

    async fn status(&self, _engine: &Engine, state: &mut StateOf<Self>, report: &mut ProgressReport) {
        report.info(format!(
            "client pause active (mode: {}), {} s remaining",
            state.params.tunables.pause_mode.as_str(),
            state.params.remaining().as_secs()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invalid_mode_falls_back_to_all() {
        let mode = |v: Value| ClientPause.prepare(&v).unwrap().pause_mode;
        assert_eq!(mode(json!({})), PauseMode::All);
        assert_eq!(mode(json!({"pause_mode": "WRITE"})), PauseMode::Write);
        assert_eq!(mode(json!({"pause_mode": "write"})), PauseMode::Write);
        assert_eq!(mode(json!({"pause_mode": "READ"})), PauseMode::All);
    }
}
