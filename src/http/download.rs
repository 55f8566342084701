use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument, warn};

use crate::error::DownloadError;
use crate::registry::{ClaimOutcome, SessionSnapshot, SessionState};
use crate::state::BridgeState;

/// How long the handler polls for a provider to show up before giving the
/// consumer a `503` (spec §4.3 step 2: "poll... with a bounded wait").
const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(500);
const CLAIM_POLL_ATTEMPTS: u32 = 20;

/// Splice buffer size (spec §4.3 step 5).
const SPLICE_BUFFER: usize = 256 * 1024;
/// A stalled provider read is retried rather than treated as fatal, up to
/// this long per read, to tolerate a slow but still-alive source.
const READ_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Fold the local byte counter into the global atomic at this granularity
/// (spec §4.3 step 5) instead of on every chunk.
const STATS_FOLD_THRESHOLD: u64 = 10 * 1024 * 1024;

/// `GET /download/{token}` (spec §4.3).
#[instrument(skip(state))]
pub async fn download(
    State(state): State<Arc<BridgeState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(token): Path<String>,
) -> Result<Response, DownloadError> {
    serve(state, token, peer).await
}

/// `GET /download/{token}/{filename}` (spec §4.3) — the trailing path
/// segment exists only so a browser saves the download under a sensible
/// name; the registry is the sole source of truth for what filename
/// actually gets used, so it is discarded here.
#[instrument(skip(state))]
pub async fn download_named(
    State(state): State<Arc<BridgeState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path((token, _filename)): Path<(String, String)>,
) -> Result<Response, DownloadError> {
    serve(state, token, peer).await
}

/// The splicer proper: rendezvous with a provider's stream and pipe it into
/// the response body without ever touching disk (spec §4.3, §1).
async fn serve(state: Arc<BridgeState>, token: String, peer: SocketAddr) -> Result<Response, DownloadError> {
    // step 1: an unknown or already-terminal token is a flat 404, with no
    // point in polling for a stream that can never arrive.
    match state.registry.snapshot(&token).await {
        None => return Err(DownloadError::NotFound),
        Some(s) if matches!(s.state, SessionState::Completed | SessionState::Evicted) => {
            return Err(DownloadError::NotFound);
        }
        Some(_) => {}
    }

    // steps 2-3: bounded poll for a provider to attach and for us to win
    // the rendezvous against any other consumer racing this token (I3).
    let (snapshot, stream) = claim_with_retry(&state, &token, &peer.to_string()).await?;

    debug!(%token, filename = %snapshot.declared_filename, "splicing provider stream to consumer");
    Ok(splice_response(state, token, snapshot, stream))
}

async fn claim_with_retry(
    state: &Arc<BridgeState>,
    token: &str,
    peer: &str,
) -> Result<(SessionSnapshot, TcpStream), DownloadError> {
    for attempt in 0..=CLAIM_POLL_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(CLAIM_POLL_INTERVAL).await;
        }
        match state.registry.try_claim_stream(token, peer).await {
            ClaimOutcome::Claimed(snapshot, stream) => return Ok((snapshot, stream)),
            ClaimOutcome::NotFound => return Err(DownloadError::NotFound),
            ClaimOutcome::NotReady => continue,
        }
    }
    // spec §9's Open Question resolves this as intended: a registration
    // that never rendezvoused with a provider within the poll window is a
    // single spent chance, not a retryable one, so the 503 also evicts it.
    warn!(token, "no provider stream appeared within the poll window, evicting");
    state.registry.evict(token).await;
    Err(DownloadError::SourceUnavailable)
}

/// Builds the streaming response: a background task drains `stream` into an
/// `mpsc` channel, and the channel becomes the response body (spec §4.3 step
/// 4, §1 "no temporary files, no disk buffering... the provider's bytes are
/// forwarded to the consumer as they arrive").
fn splice_response(
    state: Arc<BridgeState>,
    token: String,
    snapshot: SessionSnapshot,
    stream: TcpStream,
) -> Response {
    let (tx, rx) = mpsc::channel::<std::io::Result<bytes::Bytes>>(4);

    tokio::spawn(splice_task(state, token, stream, tx));

    let body = Body::from_stream(ReceiverStream::new(rx));

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    if let Ok(value) = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        sanitize_header_value(&snapshot.declared_filename)
    )) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if snapshot.declared_size > 0 {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(snapshot.declared_size));
    }
    if let Ok(value) = HeaderValue::from_str(&snapshot.token) {
        headers.insert("x-filebridge-token", value);
    }
    if let Ok(value) = HeaderValue::from_str(&sanitize_header_value(&snapshot.declared_filename)) {
        headers.insert("x-filebridge-filename", value);
    }
    response
}

/// Drains the provider socket into `tx`, chunk by chunk, folding the byte
/// count into global stats periodically instead of per-chunk (spec §4.3
/// step 5) and always finishing the session off — successful EOF, a dead
/// provider, or the consumer hanging up all end the same way: evict via
/// [`crate::registry::Registry::finish_download`].
async fn splice_task(
    state: Arc<BridgeState>,
    token: String,
    mut stream: TcpStream,
    tx: mpsc::Sender<std::io::Result<bytes::Bytes>>,
) {
    let mut buf = vec![0u8; SPLICE_BUFFER];
    let mut unfolded: u64 = 0;

    'splice: loop {
        let read = match timeout(READ_TIMEOUT, stream.read(&mut buf)).await {
            Ok(Ok(0)) => break 'splice, // clean EOF: provider finished sending
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!(%token, err = %e, "provider read error, ending splice");
                let _ = tx.send(Err(e)).await;
                break 'splice;
            }
            Err(_elapsed) => {
                // no bytes within the window but the socket itself hasn't
                // errored — re-arm the deadline and try again rather than
                // failing a merely slow transfer.
                debug!(%token, "provider read stalled, retrying");
                continue 'splice;
            }
        };

        unfolded += read as u64;
        if unfolded >= STATS_FOLD_THRESHOLD {
            state.registry.stats.add_bytes(unfolded);
            unfolded = 0;
        }

        let chunk = bytes::Bytes::copy_from_slice(&buf[..read]);
        if tx.send(Ok(chunk)).await.is_err() {
            debug!(%token, "consumer disconnected, ending splice");
            break 'splice;
        }
    }

    if unfolded > 0 {
        state.registry.stats.add_bytes(unfolded);
    }

    state.registry.finish_download(&token).await;
}

fn sanitize_header_value(name: &str) -> String {
    name.replace(['"', '\r', '\n'], "_")
}
