use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use tracing::instrument;

use crate::registry::StatsSnapshot;
use crate::state::BridgeState;

/// `GET /stats` (spec §4.4, §6.1).
#[instrument(skip(state))]
pub async fn stats(State(state): State<Arc<BridgeState>>) -> Json<StatsSnapshot> {
    let (registered_files, active_streams) = state.registry.counts().await;
    Json(state.registry.stats.snapshot(registered_files, active_streams))
}
