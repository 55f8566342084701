use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::state::BridgeState;

/// Expiry Sweeper tick interval (spec §4.6/§5).
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Runs the Expiry Sweeper (spec §4.6): on each tick, evicts every session
/// whose `expires_at` has passed. Returns once `cancel` fires.
#[instrument(skip(state, cancel))]
pub async fn run(state: Arc<BridgeState>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("expiry sweeper shutting down");
                return;
            }
            _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
        }

        let expired = state.registry.sweep_expired(Utc::now()).await;
        for token in &expired {
            state.registry.evict(token).await;
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "swept expired sessions");
        }
    }
}
