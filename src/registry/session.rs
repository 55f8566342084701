use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpStream;

/// Session lifecycle (spec §3). Transitions only go
/// `Registered -> Streaming -> Completed` or `(any) -> Evicted` (I4).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Registered,
    Streaming,
    Completed,
    Evicted,
}

/// Per-file record (spec §3). Owned exclusively by the Registry; never
/// cloned whole (the `stream` field is not `Clone`) — callers that need a
/// read-only view use [`SessionSnapshot`] instead.
pub struct Session {
    pub token: String,
    pub declared_filename: String,
    pub declared_size: u64,
    pub state: SessionState,
    pub registered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub stream_started_at: Option<DateTime<Utc>>,
    pub provider_peer: Option<String>,
    pub stream: Option<TcpStream>,
    pub download_done: bool,
    pub consumer_peer: Option<String>,
    /// Set once a download handler has taken ownership of `stream` for the
    /// duration of a splice (I2/I3: the stream is "exactly one" for the
    /// session conceptually, even though it briefly lives outside the
    /// registry while being copied into a response body). Once set, the
    /// Health Monitor stops probing — liveness detection is now the
    /// splice loop's job (read errors/timeouts), not the monitor's.
    pub stream_claimed: bool,
}

impl Session {
    pub fn new(
        token: String,
        declared_filename: String,
        declared_size: u64,
        registered_at: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Session {
            token,
            declared_filename,
            declared_size,
            state: SessionState::Registered,
            registered_at,
            expires_at: registered_at + ttl,
            stream_started_at: None,
            provider_peer: None,
            stream: None,
            download_done: false,
            consumer_peer: None,
            stream_claimed: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            token: self.token.clone(),
            declared_filename: self.declared_filename.clone(),
            declared_size: self.declared_size,
            state: self.state,
            registered_at: self.registered_at,
            expires_at: self.expires_at,
            stream_started_at: self.stream_started_at,
            provider_peer: self.provider_peer.clone(),
            download_done: self.download_done,
            consumer_peer: self.consumer_peer.clone(),
        }
    }
}

/// Read-only copy of a [`Session`]'s metadata, safe to hand to an HTTP
/// handler without holding the Registry lock (spec §3 Ownership).
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub token: String,
    pub declared_filename: String,
    pub declared_size: u64,
    pub state: SessionState,
    pub registered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub stream_started_at: Option<DateTime<Utc>>,
    pub provider_peer: Option<String>,
    pub download_done: bool,
    pub consumer_peer: Option<String>,
}
