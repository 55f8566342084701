use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::BridgeState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
}

/// `GET /health` (spec §4.4): `200` unconditionally while the process is up;
/// `status` reports `shutting_down` once the Shutdown Coordinator has fired
/// so a front proxy or orchestrator can drain traffic away in time.
pub async fn health(State(state): State<Arc<BridgeState>>) -> Json<HealthResponse> {
    let status = if state.is_shutting_down() { "shutting_down" } else { "healthy" };
    Json(HealthResponse {
        status,
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
