use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::state::BridgeState;

/// Bounded grace period for the HTTP front's graceful shutdown (spec §4.7,
/// §5 "HTTP graceful shutdown 5 s").
pub const HTTP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Waits for Ctrl-C or SIGTERM, then drives the Shutdown Coordinator (spec
/// §4.7): marks `shutting_down`, which the acceptor loop, sweeper, and
/// health monitors observe via the shared `CancellationToken`, then evicts
/// every session (closing streams unblocks any in-flight splice's read).
pub async fn wait_and_trigger(state: Arc<BridgeState>) {
    wait_for_signal().await;
    info!("shutdown signal received");

    state.cancel.cancel();
    state.registry.evict_all().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
