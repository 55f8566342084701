pub mod download;
pub mod health;
pub mod register;
pub mod stats;
pub mod status;

use std::sync::Arc;

use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::BridgeState;

/// Assembles the HTTP Front router (spec §4.8, §6.1). CORS is permissive —
/// `*` origin, `GET POST OPTIONS`, `Content-Type` header, `200` to preflight
/// — via `tower_http`'s `CorsLayer`, the standard `axum`-ecosystem way to get
/// this rather than hand-rolling `OPTIONS` handling.
pub fn router(state: Arc<BridgeState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/register", post(register::register))
        .route("/status/{token}", get(status::status))
        .route("/download/{token}", get(download::download))
        .route("/download/{token}/{filename}", get(download::download_named))
        .route("/stats", get(stats::stats))
        .route("/health", get(health::health))
        .layer(cors)
        .with_state(state)
}
