use std::io::ErrorKind;

use socket2::SockRef;
use tokio::net::TcpStream;
use tracing::warn;

/// Non-blocking liveness probe for a provider's TCP socket (spec §4.5).
///
/// Uses the strongest non-blocking check the platform offers: a
/// `MSG_PEEK`-based zero-byte read (never consumes data) on every platform,
/// plus a `TCP_INFO` kernel-state check on Linux. Reading zero bytes with no
/// error, a non-`ESTABLISHED` TCP state, or any hard error other than
/// "would block" indicates a dead peer.
pub fn is_alive(stream: &TcpStream) -> bool {
    let sock = SockRef::from(stream);

    let mut peek_buf = [0u8; 1];
    match sock.peek(&mut peek_buf) {
        Ok(0) => {
            // peer performed an orderly shutdown; no more bytes will ever arrive
            return false;
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::WouldBlock => {
            // no data pending right now, which tells us nothing either way
        }
        Err(e) => {
            warn!(err = %e, "health probe peek failed");
            return false;
        }
    }

    linux_tcp_state_established(stream).unwrap_or(true)
}

#[cfg(target_os = "linux")]
fn linux_tcp_state_established(stream: &TcpStream) -> Option<bool> {
    use std::os::fd::AsRawFd;

    // from linux/tcp.h: TCP_ESTABLISHED == 1. tcp_info's layout is a kernel
    // ABI promise (see tcp(7)); bindgen-free use here is the same approach
    // every minimal-dependency Linux socket-introspection snippet takes.
    #[repr(C)]
    #[derive(Default)]
    struct TcpInfo {
        tcpi_state: u8,
        _rest: [u8; 192],
    }

    const TCP_ESTABLISHED: u8 = 1;

    let fd = stream.as_raw_fd();
    let mut info = TcpInfo::default();
    let mut len = std::mem::size_of::<TcpInfo>() as libc::socklen_t;

    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_INFO,
            &mut info as *mut TcpInfo as *mut libc::c_void,
            &mut len,
        )
    };

    if rc != 0 {
        return None;
    }

    Some(info.tcpi_state == TCP_ESTABLISHED)
}

#[cfg(not(target_os = "linux"))]
fn linux_tcp_state_established(_stream: &TcpStream) -> Option<bool> {
    None
}
