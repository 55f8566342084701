use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::state::BridgeState;
use crate::stream::health_monitor;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const HANDSHAKE_MAX_LINE: usize = 4096;
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);
const HEALTH_TICK: Duration = Duration::from_secs(30);

const STREAM_READY: &[u8] = b"STREAM_READY\n";
const INVALID_CONNECTION: &[u8] = b"INVALID_CONNECTION\n";

/// Handshake line (spec §6.2): `{"auth_token": "...", "filename": "..."}`.
/// `filename` and any other fields are accepted but ignored.
#[derive(Deserialize)]
struct Handshake {
    auth_token: String,
}

/// Binds the provider-stream TCP port and spawns one task per accepted
/// connection (spec §4.2, §5 "each accepted TCP connection... runs in its
/// own thread of control" — realized here as an independently-scheduled
/// `tokio` task). Returns when `cancel` fires (spec §4.7 shutdown).
#[instrument(skip(state, cancel))]
pub async fn run(
    state: Arc<BridgeState>,
    socket: SocketAddr,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(socket).await?;
    info!(%socket, "stream acceptor listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("stream acceptor shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(err = %e, "failed to accept provider connection");
                        continue;
                    }
                };
                let state = Arc::clone(&state);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    handle_connection(state, stream, peer, cancel).await;
                });
            }
        }
    }
}

/// Drives one provider connection through the handshake (spec §4.2). If
/// the handshake does not reach a successful `attach_stream`, the
/// connection is closed on return — including the case where the bytes
/// themselves were well-formed but the token was invalid.
#[instrument(skip(state, stream, cancel), fields(peer = %peer))]
async fn handle_connection(
    state: Arc<BridgeState>,
    mut stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) {
    if let Err(e) = set_keepalive(&stream) {
        warn!(err = %e, "failed to set TCP keepalive on provider connection");
    }

    let token = match timeout(HANDSHAKE_TIMEOUT, read_handshake_line(&mut stream)).await {
        Ok(Ok(line)) => match serde_json::from_str::<Handshake>(&line) {
            Ok(handshake) if !handshake.auth_token.is_empty() => handshake.auth_token,
            _ => {
                warn!("malformed provider handshake");
                reject(&mut stream).await;
                return;
            }
        },
        Ok(Err(e)) => {
            warn!(err = %e, "failed to read provider handshake");
            reject(&mut stream).await;
            return;
        }
        Err(_elapsed) => {
            warn!("provider handshake timed out");
            reject(&mut stream).await;
            return;
        }
    };

    if let Err(err) = state.registry.attach_stream(&token, peer.to_string()).await {
        warn!(%token, ?err, "provider handshake rejected");
        reject(&mut stream).await;
        return;
    }

    // reply on our own still-owned handle before handing it to the
    // registry, matching the wire order in spec §6.2 (reply, then the
    // provider starts writing file bytes).
    if stream.write_all(STREAM_READY).await.is_err() {
        warn!(%token, "failed to write STREAM_READY, evicting reserved session");
        state.registry.evict(&token).await;
        return;
    }

    info!(%token, "provider stream ready");
    state.registry.install_stream(&token, stream).await;
    health_monitor::spawn(state, token, cancel, HEALTH_TICK);
}

async fn read_handshake_line(stream: &mut TcpStream) -> std::io::Result<String> {
    // the protocol guarantees the provider sends exactly one line and then
    // waits for our reply before writing any file bytes (spec §6.2), so
    // reading byte-by-byte until '\n' never risks consuming stream payload
    // that should instead be left for the splice.
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if line.len() >= HANDSHAKE_MAX_LINE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "handshake line too long",
            ));
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before handshake completed",
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    String::from_utf8(line).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

async fn reject(stream: &mut TcpStream) {
    let _ = stream.write_all(INVALID_CONNECTION).await;
    let _ = stream.shutdown().await;
}

fn set_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    let sock = SockRef::from(stream);
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_PERIOD);
    sock.set_tcp_keepalive(&keepalive)
}
