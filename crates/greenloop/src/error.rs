//! Socket-facing error classification and address-family/type enums.
//!
//! The actual error type is [`greenloop_core::GreenError`], shared across
//! the whole runtime; this module only adds what's specific to sockets —
//! the POSIX errno sets a non-blocking socket needs classified (`guv`'s
//! `exceptions.py`) and the `Domain`/`Type` pair a [`crate::socket::Socket`]
//! is parameterized by.

pub use greenloop_core::GreenError;

/// Address family, mirroring `socket2::Domain` closely enough to be a
/// drop-in for callers already familiar with it, without pulling in the
/// dependency for two variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Ipv4,
    Ipv6,
}

impl Domain {
    pub(crate) fn to_raw(self) -> libc::c_int {
        match self {
            Domain::Ipv4 => libc::AF_INET,
            Domain::Ipv6 => libc::AF_INET6,
        }
    }

    pub(crate) fn for_addr(addr: &std::net::SocketAddr) -> Self {
        match addr {
            std::net::SocketAddr::V4(_) => Domain::Ipv4,
            std::net::SocketAddr::V6(_) => Domain::Ipv6,
        }
    }
}

/// Socket type: stream (TCP) or datagram (UDP). `Socket` itself is generic
/// over this instead of having separate TCP/UDP implementations (spec
/// §4.F) — the non-blocking readiness dance is identical either way, only
/// the system calls used to move bytes differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Stream,
    Datagram,
}

impl Type {
    pub(crate) fn to_raw(self) -> libc::c_int {
        match self {
            Type::Stream => libc::SOCK_STREAM,
            Type::Datagram => libc::SOCK_DGRAM,
        }
    }
}

/// True for the errno values a non-blocking socket op raises in place of
/// actually blocking. Platform-specific: on Windows `ENOTCONN` belongs
/// here, on POSIX it's surfaced as closed instead (`guv/exceptions.py`).
pub(crate) fn is_blocking_error(err: &std::io::Error) -> bool {
    match err.raw_os_error() {
        Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) => true,
        #[cfg(not(windows))]
        Some(libc::ENOTCONN) => true,
        _ => false,
    }
}

/// True for errno values meaning the peer is gone.
pub(crate) fn is_closed_error(err: &std::io::Error) -> bool {
    match err.raw_os_error() {
        Some(libc::ECONNRESET) | Some(libc::ESHUTDOWN) => true,
        #[cfg(not(windows))]
        Some(libc::EPIPE) => true,
        #[cfg(windows)]
        Some(libc::ENOTCONN) => true,
        _ => false,
    }
}

/// True for errno values a non-blocking `connect()` raises while the
/// handshake is still in flight.
pub(crate) fn is_connect_in_progress(err: &std::io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EINPROGRESS) | Some(libc::EALREADY) | Some(libc::EWOULDBLOCK)
    )
}

/// True for the pending-socket-error values meaning the connect actually
/// succeeded (`getsockopt(SO_ERROR)` after a writable wake can return
/// either of these instead of 0 depending on platform).
pub(crate) fn is_connect_success(raw_errno: libc::c_int) -> bool {
    raw_errno == 0 || raw_errno == libc::EISCONN
}

/// Map a raw I/O error from a socket syscall onto the runtime's error
/// taxonomy, collapsing "closed" errnos to `GreenError::Closed` and
/// passing everything else through as `GreenError::Io`.
pub(crate) fn classify(err: std::io::Error) -> GreenError {
    if is_closed_error(&err) {
        GreenError::Closed
    } else {
        GreenError::Io(err)
    }
}
