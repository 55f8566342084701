use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Process-wide counters (spec §3). Implemented as independent atomics
/// rather than fields mutated solely under the Registry's `RwLock` — the
/// spec permits either ("Updated under the Registry lock or with atomic
/// counters") and atomics keep the hot byte-counter path in the splice loop
/// (spec §4.3 step 5) off the write lock entirely.
pub struct ServerStats {
    start_time: DateTime<Utc>,
    registrations: AtomicU64,
    completed_transfers: AtomicU64,
    bytes_transferred: AtomicU64,
    active_streams: AtomicI64,
    peak_streams: AtomicU64,
}

impl ServerStats {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        ServerStats {
            start_time,
            registrations: AtomicU64::new(0),
            completed_transfers: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            active_streams: AtomicI64::new(0),
            peak_streams: AtomicU64::new(0),
        }
    }

    pub fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_started(&self) {
        let active = self.active_streams.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_streams.fetch_max(active.max(0) as u64, Ordering::Relaxed);
    }

    pub fn record_stream_ended(&self) {
        self.active_streams.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_completed_transfer(&self) {
        self.completed_transfers.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds a locally-accumulated byte count into the global total
    /// (spec §4.3 step 5: "periodically fold it into the global stats
    /// counter to avoid lock churn"). P2 (monotonic) holds because this is
    /// the only mutator and it only ever adds.
    pub fn add_bytes(&self, n: u64) {
        if n > 0 {
            self.bytes_transferred.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// `active_connections` and `active_streams` report the same underlying
    /// counter (P7 requires `peak_connections >= active_connections` at all
    /// times, which only holds if `peak_streams` tracks the exact quantity
    /// reported as "active"; splitting them into distinct metrics would let
    /// a burst of `registered`-but-not-yet-streaming sessions push
    /// `active_connections` above a `peak_connections` that only ever
    /// watched the streaming count).
    pub fn snapshot(&self, registered_files: u64, active_streams: u64) -> StatsSnapshot {
        StatsSnapshot {
            status: "ok",
            uptime: (Utc::now() - self.start_time).num_seconds().max(0) as u64,
            files_registered: self.registrations.load(Ordering::Relaxed),
            files_transferred: self.completed_transfers.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            active_connections: active_streams,
            peak_connections: self.peak_streams.load(Ordering::Relaxed),
            registered_files,
            active_streams,
            completed_downloads: self.completed_transfers.load(Ordering::Relaxed),
        }
    }
}

/// `GET /stats` response body (spec §6.1).
#[derive(Serialize)]
pub struct StatsSnapshot {
    pub status: &'static str,
    /// seconds since process start (spec §6.1 `uptime`).
    pub uptime: u64,
    pub files_registered: u64,
    pub files_transferred: u64,
    pub bytes_transferred: u64,
    pub active_connections: u64,
    pub peak_connections: u64,
    pub registered_files: u64,
    pub active_streams: u64,
    pub completed_downloads: u64,
}
