//! Health checks.
//!
//! A check applies no effect. Start verifies the target answers and
//! registers the execution; every status call samples the target directly
//! and feeds the sample through [`Observations`], which turns threshold
//! violations into warnings while the window is open and into a failure
//! only for a sample taken once it has closed.

mod blocked_clients;
mod connections;
mod hit_rate;
mod latency;
mod memory;
mod replication;

use std::sync::Arc;

use redfault_shared::errors::{FaultError, FaultResult};
use serde::{Deserialize, Serialize};

pub use blocked_clients::{BlockedClients, BlockedClientsOutputs, BlockedClientsParams};
pub use connections::{Connections, ConnectionsOutputs, ConnectionsParams};
pub use hit_rate::{HitRate, HitRateOutputs, HitRateParams};
pub use latency::{Latency, LatencyOutputs, LatencyParams};
pub use memory::{Memory, MemoryOutputs, MemoryParams};
pub use replication::{Replication, ReplicationOutputs, ReplicationParams};

use crate::engine::{ExecutionParameters, NoCleanup};
use crate::lifecycle::{Engine, ProgressReport};
use crate::target::TargetHandle;

/// Violation bookkeeping carried in every check's outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observations {
    pub samples: u64,
    pub violations: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_violation: Option<String>,
}

impl Observations {
    /// Settle one sample. Only a sample taken after the window closed can
    /// fail the check; earlier violations are warnings.
    pub(crate) fn record(&mut self, report: &mut ProgressReport, violation: Option<String>) {
        self.samples += 1;
        if let Some(detail) = violation {
            self.violations += 1;
            self.last_violation = Some(detail.clone());
            report.settle(true, detail);
        }
    }

    /// An unreachable target counts as a violated sample.
    pub(crate) fn unreachable(&mut self, report: &mut ProgressReport, error: &FaultError) {
        let detail = match error {
            FaultError::UnreachableTarget(_) => error.to_string(),
            other => format!("target unreachable: {}", other),
        };
        self.record(report, Some(detail));
    }
}

/// Verify the target answers and register the execution so stop and
/// shutdown see it. Returns the open pre-flight handle.
pub(crate) async fn begin<P>(
    engine: &Engine,
    params: &ExecutionParameters<P>,
) -> FaultResult<Box<dyn TargetHandle>> {
    let mut handle = engine.preflight(&params.target).await?;
    if let Err(e) = engine.launch_idle(params, Arc::new(NoCleanup)) {
        handle.close().await;
        return Err(e);
    }
    Ok(handle)
}
