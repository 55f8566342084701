pub mod config;
pub mod error;
pub mod http;
pub mod registry;
pub mod shutdown;
pub mod state;
pub mod stream;
pub mod sweeper;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

pub use config::BridgeConfig;
pub use state::BridgeState;

/// Wires up and runs every long-lived task (spec §4, §5): the HTTP Front,
/// the Stream Acceptor, the Expiry Sweeper, and the Shutdown Coordinator.
/// Returns once the HTTP front's graceful-shutdown grace period elapses.
pub async fn run(config: BridgeConfig) -> Result<()> {
    let http_socket = config.http.socket.parse().context("invalid http.socket")?;
    let tcp_socket = config.tcp.socket.parse().context("invalid tcp.socket")?;

    let state = BridgeState::new(Arc::new(config));

    let acceptor = tokio::spawn(stream::acceptor::run(
        state.clone(),
        tcp_socket,
        state.cancel.clone(),
    ));
    let sweeper = tokio::spawn(sweeper::run(state.clone(), state.cancel.clone()));
    let shutdown_trigger = tokio::spawn(shutdown::wait_and_trigger(state.clone()));

    let listener = TcpListener::bind(http_socket)
        .await
        .with_context(|| format!("failed to bind HTTP front on {http_socket}"))?;
    info!(%http_socket, %tcp_socket, "filebridge listening");

    let router = http::router(state.clone());

    // axum stops accepting new connections the instant this signal future
    // resolves (spec §4.7 "stop the acceptor loop" applied to the HTTP
    // front); the grace period bounds only the drain of connections already
    // in flight, raced separately below rather than nested inside the
    // signal itself.
    let shutdown_signal = {
        let cancel = state.cancel.clone();
        async move { cancel.cancelled().await }
    };
    let serve_future = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal);

    let grace_deadline = {
        let cancel = state.cancel.clone();
        async move {
            cancel.cancelled().await;
            tokio::time::sleep(shutdown::HTTP_GRACE_PERIOD).await;
        }
    };

    tokio::select! {
        result = serve_future => {
            result.context("HTTP front exited unexpectedly")?;
        }
        _ = grace_deadline => {
            info!(grace = ?shutdown::HTTP_GRACE_PERIOD, "HTTP front grace period elapsed, forcing shutdown");
        }
    }

    shutdown_trigger.abort();
    sweeper.abort();
    acceptor.abort();
    Ok(())
}
