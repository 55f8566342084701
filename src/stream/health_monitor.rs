use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::registry::ProbeOutcome;
use crate::state::BridgeState;

/// Spawns the per-stream Health Monitor (spec §4.5): a task that ticks
/// every `period` and probes the session's provider socket for liveness,
/// stopping once the session is gone, completed, or claimed by a download
/// handler.
pub fn spawn(state: Arc<BridgeState>, token: String, cancel: CancellationToken, period: Duration) {
    tokio::spawn(async move {
        run(state, token, cancel, period).await;
    });
}

#[instrument(skip(state, cancel))]
async fn run(state: Arc<BridgeState>, token: String, cancel: CancellationToken, period: Duration) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%token, "health monitor stopping for shutdown");
                return;
            }
            _ = tokio::time::sleep(period) => {}
        }

        match state.registry.probe_liveness(&token).await {
            ProbeOutcome::StopMonitoring => {
                debug!(%token, "health monitor stopping");
                return;
            }
            ProbeOutcome::StillAlive => {}
            ProbeOutcome::Dead => {
                state.registry.evict(&token).await;
                return;
            }
        }
    }
}
