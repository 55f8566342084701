use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::registry::Registry;

/// The one piece of shared mutable state the Bridge has (spec §5): a
/// Registry behind a single lock, plus the (largely static) config and a
/// shutdown signal. Passed into `axum` handlers via `State<Arc<BridgeState>>`
/// rather than the teacher's actor/`mpsc`-message-passing indirection — see
/// `DESIGN.md`'s "Workspace collapse" entry.
pub struct BridgeState {
    pub registry: Registry,
    pub config: Arc<BridgeConfig>,
    pub cancel: CancellationToken,
}

impl BridgeState {
    pub fn new(config: Arc<BridgeConfig>) -> Arc<Self> {
        Arc::new(BridgeState {
            registry: Registry::new(config.token_length),
            config,
            cancel: CancellationToken::new(),
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
