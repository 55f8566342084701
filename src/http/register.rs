use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::RegisterError;
use crate::registry::RegisterError as RegistryRegisterError;
use crate::state::BridgeState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub filename: String,
    pub size: u64,
}

#[derive(Serialize)]
pub struct TcpEndpoint {
    pub host: String,
    pub port: u16,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub auth_token: String,
    pub tcp_endpoint: TcpEndpoint,
    pub download_url: String,
    pub expires_at: DateTime<Utc>,
    pub original_filename: String,
}

/// `POST /register` (spec §4.1, §6.1).
#[instrument(skip(state, headers))]
pub async fn register(
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, RegisterError> {
    let max_size = state.config.max_file_size_bytes();

    let snapshot = state
        .registry
        .register(req.filename.clone(), req.size, max_size)
        .await
        .map_err(|e| match e {
            RegistryRegisterError::EmptyFilename => RegisterError::EmptyFilename,
            RegistryRegisterError::OverSize => RegisterError::OverSize,
        })?;

    let download_url = build_download_url(&state, &headers, &snapshot.token);

    Ok(Json(RegisterResponse {
        auth_token: snapshot.token,
        tcp_endpoint: TcpEndpoint {
            host: state.config.tcp.public_host.clone(),
            port: tcp_port(&state),
        },
        download_url,
        expires_at: snapshot.expires_at,
        original_filename: req.filename,
    }))
}

fn tcp_port(state: &BridgeState) -> u16 {
    state
        .config
        .tcp
        .socket
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0)
}

/// Synthesizes `download_url` (spec §4.8, §9 re-architecture): a configured
/// `public_base_url` wins outright; otherwise fall back to request-derived
/// scheme/host, omitting the port when a reverse proxy (forwarded headers
/// present) fronts the service.
fn build_download_url(state: &BridgeState, headers: &HeaderMap, token: &str) -> String {
    if let Some(base) = &state.config.http.public_base_url {
        return format!("{}/download/{}", base.trim_end_matches('/'), token);
    }

    let forwarded_proto = headers
        .get("x-forwarded-proto")
        .or_else(|| headers.get("x-forwarded-scheme"))
        .and_then(|v| v.to_str().ok());

    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");

    match forwarded_proto {
        Some(scheme) => format!("{scheme}://{host}/download/{token}"),
        None => {
            let port = state
                .config
                .http
                .socket
                .rsplit(':')
                .next()
                .unwrap_or("8080");
            let host_only = host.split(':').next().unwrap_or(host);
            format!("http://{host_only}:{port}/download/{token}")
        }
    }
}
