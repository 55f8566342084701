pub mod session;
pub mod stats;
pub mod token;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

pub use session::{Session, SessionSnapshot, SessionState};
pub use stats::{ServerStats, StatsSnapshot};

/// Session TTL (spec §3): `expires_at = registered_at + TTL`.
pub const SESSION_TTL: chrono::Duration = chrono::Duration::hours(2);

#[derive(Debug)]
pub enum RegisterError {
    EmptyFilename,
    OverSize,
}

#[derive(Debug)]
pub enum AttachError {
    UnknownToken,
    WrongState,
    Expired,
    AlreadyCompleted,
}

/// Outcome of attempting to claim a session's provider stream for a splice
/// (spec §4.3 steps 1-3). `NotFound` covers both an unknown token and one
/// that already reached a terminal state; callers map it straight to 404
/// without retrying. `NotReady` means the session exists and could still
/// receive a stream later — callers poll on this.
pub enum ClaimOutcome {
    Claimed(SessionSnapshot, TcpStream),
    NotFound,
    NotReady,
}

/// Outcome of a single Health Monitor tick's liveness probe (spec §4.5).
pub enum ProbeOutcome {
    /// Session gone, completed, or its stream already claimed by a download
    /// handler — the monitor's job here is done, it should stop.
    StopMonitoring,
    StillAlive,
    Dead,
}

/// The Handle Registry (spec §4.1): a single reader/writer lock guarding a
/// map from auth token to [`Session`], following the
/// `Arc<RwLock<HashMap<K, V>>>` shape in `common/src/lockmap.rs`.
pub struct Registry {
    sessions: RwLock<HashMap<String, Session>>,
    pub stats: ServerStats,
    token_length: usize,
}

impl Registry {
    pub fn new(token_length: usize) -> Self {
        Registry {
            sessions: RwLock::new(HashMap::new()),
            stats: ServerStats::new(Utc::now()),
            token_length,
        }
    }

    /// Mints a fresh token and inserts a new `Registered` session (spec
    /// §4.1 `register`). Empty-name and oversize checks happen before any
    /// token is minted.
    #[instrument(skip(self))]
    pub async fn register(
        &self,
        filename: String,
        size: u64,
        max_size: u64,
    ) -> Result<SessionSnapshot, RegisterError> {
        if filename.is_empty() {
            return Err(RegisterError::EmptyFilename);
        }
        if size > max_size {
            return Err(RegisterError::OverSize);
        }

        let now = Utc::now();
        let mut sessions = self.sessions.write().await;

        // I1: token uniqueness. An alphanumeric token of reasonable length
        // colliding with a live entry is astronomically unlikely; retry a
        // bounded number of times rather than looping forever on a bug.
        let mut token = token::mint(self.token_length);
        for _ in 0..8 {
            if !sessions.contains_key(&token) {
                break;
            }
            token = token::mint(self.token_length);
        }

        let session = Session::new(token.clone(), filename, size, now, SESSION_TTL);
        let snapshot = session.snapshot();
        sessions.insert(token, session);
        drop(sessions);

        self.stats.record_registration();
        debug!(token = %snapshot.token, "session registered");
        Ok(snapshot)
    }

    /// Validates and reserves a session for a provider stream (spec §4.1
    /// `attach_stream`). Atomic: the existence/state/expiry check and the
    /// transition to `Streaming` happen under one write-lock acquisition,
    /// closing the race the source's `validateStreamConnection` had (spec
    /// §9 Open Question).
    ///
    /// This does not take ownership of the socket — the acceptor must
    /// still write the `STREAM_READY` reply on its own handle before
    /// handing the socket to the registry via [`Registry::install_stream`].
    /// Splitting the call this way lets the handshake's wire order (validate,
    /// then reply, then start accepting the session as the stream owner)
    /// match spec §4.2 exactly while keeping the state transition itself
    /// atomic.
    #[instrument(skip(self))]
    pub async fn attach_stream(&self, token: &str, peer: String) -> Result<(), AttachError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;

        let session = sessions.get_mut(token).ok_or(AttachError::UnknownToken)?;

        match session.state {
            SessionState::Completed | SessionState::Evicted => {
                return Err(AttachError::AlreadyCompleted);
            }
            SessionState::Streaming => return Err(AttachError::WrongState),
            SessionState::Registered => {}
        }

        if session.is_expired(now) {
            return Err(AttachError::Expired);
        }

        session.state = SessionState::Streaming;
        session.provider_peer = Some(peer);
        session.stream_started_at = Some(now);

        self.stats.record_stream_started();
        debug!(%token, "provider stream reserved");
        Ok(())
    }

    /// Hands the provider socket to the session reserved by a prior
    /// successful [`Registry::attach_stream`] call. If the session
    /// disappeared in the narrow window between reservation and the
    /// `STREAM_READY` reply (e.g. an expiry sweep or shutdown), the socket
    /// is simply dropped, closing it.
    #[instrument(skip(self, stream))]
    pub async fn install_stream(&self, token: &str, stream: TcpStream) {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(token) {
            Some(session) if session.state == SessionState::Streaming => {
                session.stream = Some(stream);
            }
            _ => {
                drop(stream);
                warn!(token, "session vanished before provider stream could be installed");
            }
        }
    }

    /// Attempts to claim a session's stream for a download splice (spec
    /// §4.3 steps 1-3, called in a bounded poll loop by the download
    /// handler). Takes the stream out of the session on success — see
    /// [`Session::stream_claimed`]. `peer` is the consumer's remote address,
    /// recorded on the session once it wins the rendezvous (spec §3
    /// `consumer_peer`).
    #[instrument(skip(self))]
    pub async fn try_claim_stream(&self, token: &str, peer: &str) -> ClaimOutcome {
        let mut sessions = self.sessions.write().await;

        let Some(session) = sessions.get_mut(token) else {
            return ClaimOutcome::NotFound;
        };

        match session.state {
            SessionState::Completed | SessionState::Evicted => ClaimOutcome::NotFound,
            SessionState::Registered | SessionState::Streaming => {
                if session.stream_claimed {
                    // someone else already won the rendezvous (I3)
                    return ClaimOutcome::NotReady;
                }
                match session.stream.take() {
                    Some(stream) => {
                        session.stream_claimed = true;
                        session.consumer_peer = Some(peer.to_owned());
                        ClaimOutcome::Claimed(session.snapshot(), stream)
                    }
                    None => ClaimOutcome::NotReady,
                }
            }
        }
    }

    /// Looks up a session without mutating it, for the initial 404 check
    /// in the download handler and for `GET /status` (spec §4.3 step 1,
    /// §4.4).
    pub async fn snapshot(&self, token: &str) -> Option<SessionSnapshot> {
        self.sessions.read().await.get(token).map(Session::snapshot)
    }

    /// Transitions to `Completed` (spec §4.1 `mark_completed`). Idempotent
    /// in the sense that a missing or already-terminal session is a no-op —
    /// callers always follow this with [`Registry::evict`].
    #[instrument(skip(self))]
    pub async fn mark_completed(&self, token: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(token) {
            if session.state != SessionState::Completed && session.state != SessionState::Evicted
            {
                session.state = SessionState::Completed;
                session.download_done = true;
                self.stats.record_completed_transfer();
            }
        }
    }

    /// Removes a session, closing its provider stream if still present
    /// (I5). Idempotent (L2): evicting an absent token is a no-op.
    #[instrument(skip(self))]
    pub async fn evict(&self, token: &str) {
        let removed = self.sessions.write().await.remove(token);
        if let Some(session) = removed {
            let was_streaming = session.state == SessionState::Streaming;
            drop(session); // closes `stream`, if any, on drop
            if was_streaming {
                self.stats.record_stream_ended();
            }
            debug!(token, "session evicted");
        }
    }

    /// Runs the full termination sequence for a finished splice (spec §4.3
    /// step 8): mark completed, then evict. The stream itself was already
    /// taken by the download handler (via [`Registry::try_claim_stream`]),
    /// so this only needs to drop the now-stream-less session entry and
    /// retire its "active stream" accounting; the handler's own
    /// `TcpStream` closes when its task returns.
    #[instrument(skip(self))]
    pub async fn finish_download(&self, token: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(token) {
            if session.state != SessionState::Evicted {
                session.state = SessionState::Completed;
                session.download_done = true;
                self.stats.record_completed_transfer();
            }
        }
        if sessions.remove(token).is_some() {
            self.stats.record_stream_ended();
        }
        drop(sessions);
        debug!(token, "download finished, session evicted");
    }

    /// Returns tokens whose deadline has passed (spec §4.1 `sweep_expired`).
    /// Enumerates under the read lock only; callers evict (write-locked)
    /// per token, per spec §4.6.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.token.clone())
            .collect()
    }

    /// Evicts every session (spec §4.7 shutdown).
    pub async fn evict_all(&self) {
        let tokens: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for token in tokens {
            self.evict(&token).await;
        }
    }

    /// Counts of sessions in `Registered`/`Streaming` state, for `GET
    /// /stats` (spec §4.4).
    pub async fn counts(&self) -> (u64, u64) {
        let sessions = self.sessions.read().await;
        let mut registered = 0u64;
        let mut streaming = 0u64;
        for session in sessions.values() {
            match session.state {
                SessionState::Registered => registered += 1,
                SessionState::Streaming => streaming += 1,
                SessionState::Completed | SessionState::Evicted => {}
            }
        }
        (registered, streaming)
    }

    /// Non-blocking liveness probe for one streaming session (spec §4.5).
    /// Returns [`ProbeOutcome::StopMonitoring`] once the session is gone,
    /// completed, or its stream has been claimed by a download handler.
    pub async fn probe_liveness(&self, token: &str) -> ProbeOutcome {
        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(token) else {
            return ProbeOutcome::StopMonitoring;
        };
        if session.state != SessionState::Streaming || session.stream_claimed {
            return ProbeOutcome::StopMonitoring;
        }
        let Some(stream) = session.stream.as_ref() else {
            return ProbeOutcome::StopMonitoring;
        };

        if crate::stream::health::is_alive(stream) {
            ProbeOutcome::StillAlive
        } else {
            warn!(token, "health monitor detected dead provider peer");
            ProbeOutcome::Dead
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accepted, _) = listener.accept().await.unwrap();
        (accepted, connect.await.unwrap())
    }

    #[tokio::test]
    async fn register_rejects_empty_filename_and_oversize() {
        let registry = Registry::new(16);
        assert!(matches!(
            registry.register(String::new(), 10, 100).await,
            Err(RegisterError::EmptyFilename)
        ));
        assert!(matches!(
            registry.register("a.bin".into(), 200, 100).await,
            Err(RegisterError::OverSize)
        ));
    }

    #[tokio::test]
    async fn attach_stream_rejects_unknown_and_repeated_attach() {
        let registry = Registry::new(16);
        let snapshot = registry.register("a.bin".into(), 10, 100).await.unwrap();

        assert!(matches!(
            registry.attach_stream("nonexistent", "1.2.3.4:1".into()).await,
            Err(AttachError::UnknownToken)
        ));

        registry
            .attach_stream(&snapshot.token, "1.2.3.4:1".into())
            .await
            .unwrap();

        // I4: a session already Streaming cannot be attached to twice.
        assert!(matches!(
            registry.attach_stream(&snapshot.token, "1.2.3.4:2".into()).await,
            Err(AttachError::WrongState)
        ));
    }

    #[tokio::test]
    async fn try_claim_stream_is_exactly_once() {
        let registry = Registry::new(16);
        let snapshot = registry.register("a.bin".into(), 10, 100).await.unwrap();
        registry
            .attach_stream(&snapshot.token, "1.2.3.4:1".into())
            .await
            .unwrap();

        let (provider_side, _consumer_side) = loopback_pair().await;
        registry.install_stream(&snapshot.token, provider_side).await;

        match registry.try_claim_stream(&snapshot.token, "9.9.9.9:1").await {
            ClaimOutcome::Claimed(_, _) => {}
            _ => panic!("expected the first claim to succeed"),
        }

        // I3: a second claim against the same token must not also succeed.
        assert!(matches!(
            registry.try_claim_stream(&snapshot.token, "9.9.9.9:1").await,
            ClaimOutcome::NotReady
        ));
    }

    #[tokio::test]
    async fn try_claim_stream_on_unknown_token_is_not_found() {
        let registry = Registry::new(16);
        assert!(matches!(
            registry.try_claim_stream("nonexistent", "9.9.9.9:1").await,
            ClaimOutcome::NotFound
        ));
    }

    #[tokio::test]
    async fn evict_is_idempotent_and_closes_stream() {
        let registry = Registry::new(16);
        let snapshot = registry.register("a.bin".into(), 10, 100).await.unwrap();
        registry
            .attach_stream(&snapshot.token, "1.2.3.4:1".into())
            .await
            .unwrap();

        registry.evict(&snapshot.token).await;
        assert!(registry.snapshot(&snapshot.token).await.is_none());
        // L2: evicting an absent token is a no-op, not an error.
        registry.evict(&snapshot.token).await;
    }

    #[tokio::test]
    async fn sweep_expired_finds_only_past_deadlines() {
        let registry = Registry::new(16);
        let snapshot = registry.register("a.bin".into(), 10, 100).await.unwrap();

        let not_yet = registry.sweep_expired(Utc::now()).await;
        assert!(not_yet.is_empty());

        let well_past = snapshot.expires_at + chrono::Duration::seconds(1);
        let expired = registry.sweep_expired(well_past).await;
        assert_eq!(expired, vec![snapshot.token]);
    }

    #[tokio::test]
    async fn finish_download_removes_session_and_records_completion() {
        let registry = Registry::new(16);
        let snapshot = registry.register("a.bin".into(), 10, 100).await.unwrap();
        registry
            .attach_stream(&snapshot.token, "1.2.3.4:1".into())
            .await
            .unwrap();

        registry.finish_download(&snapshot.token).await;
        assert!(registry.snapshot(&snapshot.token).await.is_none());

        let (registered, streaming) = registry.counts().await;
        assert_eq!(registered, 0);
        assert_eq!(streaming, 0);
    }
}
