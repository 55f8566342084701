use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use tracing::instrument;

use crate::error::UnknownToken;
use crate::registry::SessionSnapshot;
use crate::state::BridgeState;

/// `GET /status/{token}` (spec §4.4). `404` on unknown or terminal token.
#[instrument(skip(state))]
pub async fn status(
    State(state): State<Arc<BridgeState>>,
    Path(token): Path<String>,
) -> Result<Json<SessionSnapshot>, UnknownToken> {
    state
        .registry
        .snapshot(&token)
        .await
        .map(Json)
        .ok_or(UnknownToken)
}
