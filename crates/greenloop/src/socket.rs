//! A non-blocking socket registered with the reactor.
//!
//! `Socket` unifies what the source runtime split across `TcpStream`,
//! `TcpListener`, and `UdpSocket` (spec §4.F): the readiness dance —
//! register, await readable/writable, retry on `WouldBlock` — is
//! identical for both socket types, only the syscalls that move bytes
//! differ. `TcpStream`/`TcpListener`/`UdpSocket` below are thin facades
//! over it, kept because callers expect those names.
//!
//! TLS is out of scope here (spec §1: "a TLS/SSL integration ... is a
//! separate, external collaborator"); [`Connector`] is the seam a TLS
//! crate would hook into `TcpStream::connect`'s output.

use std::cell::Cell;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::time::Duration;

use greenloop_core::reactor::{self, Direction, IoKey};
use greenloop_core::trampoline;
use greenloop_core::GreenError;

use crate::error::{
    classify, is_blocking_error, is_closed_error, is_connect_in_progress, is_connect_success, Domain, Type,
};

pub(crate) fn socket_addr_to_raw(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    match addr {
        SocketAddr::V4(v4) => {
            let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            let sin = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
            #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
            {
                sin.sin_len = std::mem::size_of::<libc::sockaddr_in>() as u8;
            }
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(v4.ip().octets()),
            };
            (storage, std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        SocketAddr::V6(v6) => {
            let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6) };
            #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
            {
                sin6.sin6_len = std::mem::size_of::<libc::sockaddr_in6>() as u8;
            }
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_addr = libc::in6_addr { s6_addr: v6.ip().octets() };
            sin6.sin6_scope_id = v6.scope_id();
            (storage, std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    }
}

pub(crate) fn raw_to_socket_addr(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = std::net::Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            Ok(SocketAddr::V4(std::net::SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = std::net::Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Ok(SocketAddr::V6(std::net::SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "unknown address family")),
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let optval: libc::c_int = 1;
    let result = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn pending_connect_error(fd: RawFd) -> io::Result<()> {
    let mut error: libc::c_int = 0;
    let mut len: libc::socklen_t = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let result = unsafe {
        libc::getsockopt(fd, libc::SOL_SOCKET, libc::SO_ERROR, &mut error as *mut _ as *mut libc::c_void, &mut len)
    };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    if is_connect_success(error) {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(error))
    }
}

fn raw_socket(domain: Domain, ty: Type) -> io::Result<OwnedFd> {
    let fd = unsafe { libc::socket(domain.to_raw(), ty.to_raw(), 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    set_nonblocking(owned.as_raw_fd())?;
    Ok(owned)
}

/// A non-blocking socket, registered with this thread's reactor.
///
/// Owns the fd; dropping a `Socket` closes it and removes both watchers.
///
/// `timeout` governs every blocking-shaped operation below (`read`,
/// `write`, `accept`, ...): `None` (the default) blocks indefinitely,
/// `Some(Duration::ZERO)` never suspends the calling task at all — an
/// operation that would block fails immediately instead of trampolining —
/// and any other `Some(d)` trampolines with `d` as the deadline.
pub struct Socket {
    fd: OwnedFd,
    io_key: IoKey,
    timeout: Cell<Option<Duration>>,
}

impl Socket {
    fn from_owned(fd: OwnedFd) -> Self {
        let io_key = reactor::with_reactor(|r| r.register_io(fd.as_raw_fd()));
        Socket { fd, io_key, timeout: Cell::new(None) }
    }

    pub fn new(domain: Domain, ty: Type) -> io::Result<Self> {
        Ok(Self::from_owned(raw_socket(domain, ty)?))
    }

    pub fn bind(domain: Domain, ty: Type, addr: SocketAddr) -> io::Result<Self> {
        let owned = raw_socket(domain, ty)?;
        if ty == Type::Stream {
            set_reuseaddr(owned.as_raw_fd())?;
        }
        let (raw_addr, addr_len) = socket_addr_to_raw(&addr);
        let result = unsafe { libc::bind(owned.as_raw_fd(), &raw_addr as *const _ as *const libc::sockaddr, addr_len) };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self::from_owned(owned))
    }

    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        if unsafe { libc::listen(self.fd.as_raw_fd(), backlog) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Connect to `addr`, suspending the calling task until the
    /// non-blocking handshake completes (spec §4.F connect algorithm:
    /// initiate, await writable, check the pending error).
    pub async fn connect(domain: Domain, ty: Type, addr: SocketAddr) -> Result<Self, GreenError> {
        let owned = raw_socket(domain, ty).map_err(GreenError::Io)?;
        let (raw_addr, addr_len) = socket_addr_to_raw(&addr);
        let result = unsafe { libc::connect(owned.as_raw_fd(), &raw_addr as *const _ as *const libc::sockaddr, addr_len) };

        let socket = Self::from_owned(owned);

        if result < 0 {
            let err = io::Error::last_os_error();
            if !is_connect_in_progress(&err) {
                return Err(classify(err));
            }
            trampoline::trampoline(socket.io_key, Direction::Write, socket.timeout.get()).await?;
            pending_connect_error(socket.fd.as_raw_fd()).map_err(classify)?;
        }

        Ok(socket)
    }

    /// Like `connect`, but returns the raw connect errno (`0` on success)
    /// instead of raising, mirroring Python socket's `connect_ex`.
    pub async fn connect_ex(&self, addr: SocketAddr) -> i32 {
        let (raw_addr, addr_len) = socket_addr_to_raw(&addr);
        let result =
            unsafe { libc::connect(self.fd.as_raw_fd(), &raw_addr as *const _ as *const libc::sockaddr, addr_len) };
        if result >= 0 {
            return 0;
        }
        let err = io::Error::last_os_error();
        if !is_connect_in_progress(&err) {
            return err.raw_os_error().unwrap_or(-1);
        }
        if trampoline::trampoline(self.io_key, Direction::Write, self.timeout.get()).await.is_err() {
            return libc::ETIMEDOUT;
        }
        let mut error: libc::c_int = 0;
        let mut len: libc::socklen_t = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        unsafe {
            libc::getsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut error as *mut _ as *mut libc::c_void,
                &mut len,
            );
        }
        error
    }

    /// Accept one incoming connection, suspending until one is ready.
    pub async fn accept(&self) -> Result<(Socket, SocketAddr), GreenError> {
        loop {
            trampoline::trampoline(self.io_key, Direction::Read, self.timeout.get()).await?;

            let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            let mut addr_len: libc::socklen_t = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
            let fd = unsafe {
                libc::accept(self.fd.as_raw_fd(), &mut storage as *mut _ as *mut libc::sockaddr, &mut addr_len)
            };

            if fd >= 0 {
                set_nonblocking(fd).map_err(GreenError::Io)?;
                let owned = unsafe { OwnedFd::from_raw_fd(fd) };
                let addr = raw_to_socket_addr(&storage).map_err(GreenError::Io)?;
                return Ok((Self::from_owned(owned), addr));
            }

            let err = io::Error::last_os_error();
            if is_blocking_error(&err) {
                continue;
            }
            return Err(classify(err));
        }
    }

    /// Read into `buf`. A closed connection is reported as EOF (`Ok(0)`),
    /// not an error — only writing to a closed socket raises.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, GreenError> {
        loop {
            let timeout = self.timeout.get();
            if timeout != Some(Duration::ZERO) {
                trampoline::trampoline(self.io_key, Direction::Read, timeout).await?;
            }
            let n = unsafe {
                libc::recv(self.fd.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if is_blocking_error(&err) {
                if timeout == Some(Duration::ZERO) {
                    return Err(classify(err));
                }
                continue;
            }
            if is_closed_error(&err) {
                return Ok(0);
            }
            return Err(classify(err));
        }
    }

    /// Alias for [`read`](Self::read) under the Berkeley name — writes
    /// into a caller-supplied buffer rather than allocating one.
    pub async fn recv_into(&self, buf: &mut [u8]) -> Result<usize, GreenError> {
        self.read(buf).await
    }

    pub async fn write(&self, buf: &[u8]) -> Result<usize, GreenError> {
        loop {
            let timeout = self.timeout.get();
            if timeout != Some(Duration::ZERO) {
                trampoline::trampoline(self.io_key, Direction::Write, timeout).await?;
            }
            let n = unsafe {
                libc::send(self.fd.as_raw_fd(), buf.as_ptr() as *const libc::c_void, buf.len(), 0)
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if is_blocking_error(&err) {
                if timeout == Some(Duration::ZERO) {
                    return Err(classify(err));
                }
                continue;
            }
            return Err(classify(err));
        }
    }

    /// Keep calling `write` until all of `buf` has been sent, mirroring
    /// Python socket's `sendall` (which otherwise silently short-writes).
    pub async fn sendall(&self, buf: &[u8]) -> Result<(), GreenError> {
        let mut sent = 0;
        while sent < buf.len() {
            let n = self.write(&buf[sent..]).await?;
            if n == 0 {
                return Err(GreenError::Closed);
            }
            sent += n;
        }
        Ok(())
    }

    pub async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, GreenError> {
        let (raw_addr, addr_len) = socket_addr_to_raw(&addr);
        loop {
            let timeout = self.timeout.get();
            if timeout != Some(Duration::ZERO) {
                trampoline::trampoline(self.io_key, Direction::Write, timeout).await?;
            }
            let n = unsafe {
                libc::sendto(
                    self.fd.as_raw_fd(),
                    buf.as_ptr() as *const libc::c_void,
                    buf.len(),
                    0,
                    &raw_addr as *const _ as *const libc::sockaddr,
                    addr_len,
                )
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if is_blocking_error(&err) {
                if timeout == Some(Duration::ZERO) {
                    return Err(classify(err));
                }
                continue;
            }
            return Err(classify(err));
        }
    }

    /// Read a datagram into `buf`. A closed connection (relevant only to
    /// connected `UdpSocket`s) is reported as EOF, same as `read`; there is
    /// no real peer address to report in that case, so an unspecified
    /// `0.0.0.0:0` is returned alongside it.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), GreenError> {
        loop {
            let timeout = self.timeout.get();
            if timeout != Some(Duration::ZERO) {
                trampoline::trampoline(self.io_key, Direction::Read, timeout).await?;
            }
            let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
            let mut addr_len: libc::socklen_t = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
            let n = unsafe {
                libc::recvfrom(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                    &mut storage as *mut _ as *mut libc::sockaddr,
                    &mut addr_len,
                )
            };
            if n >= 0 {
                let addr = raw_to_socket_addr(&storage).map_err(GreenError::Io)?;
                return Ok((n as usize, addr));
            }
            let err = io::Error::last_os_error();
            if is_blocking_error(&err) {
                if timeout == Some(Duration::ZERO) {
                    return Err(classify(err));
                }
                continue;
            }
            if is_closed_error(&err) {
                return Ok((0, SocketAddr::from(([0, 0, 0, 0], 0))));
            }
            return Err(classify(err));
        }
    }

    /// Alias for [`recv_from`](Self::recv_from) under the Berkeley name.
    pub async fn recvfrom_into(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), GreenError> {
        self.recv_from(buf).await
    }

    /// The timeout applied to every blocking-shaped operation on this
    /// socket. See the struct docs for the three-way `None`/`Some(ZERO)`/
    /// `Some(d)` semantics.
    pub fn settimeout(&self, timeout: Option<Duration>) {
        self.timeout.set(timeout);
    }

    pub fn gettimeout(&self) -> Option<Duration> {
        self.timeout.get()
    }

    /// `setblocking(true)` clears any timeout (block indefinitely);
    /// `setblocking(false)` is equivalent to `settimeout(Some(ZERO))`.
    pub fn setblocking(&self, blocking: bool) {
        self.timeout.set(if blocking { None } else { Some(Duration::ZERO) });
    }

    pub fn setsockopt(&self, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
        let optval: libc::c_int = value;
        let result = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                level,
                name,
                &optval as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn getsockopt(&self, level: libc::c_int, name: libc::c_int) -> io::Result<libc::c_int> {
        let mut value: libc::c_int = 0;
        let mut len: libc::socklen_t = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let result = unsafe {
            libc::getsockopt(self.fd.as_raw_fd(), level, name, &mut value as *mut _ as *mut libc::c_void, &mut len)
        };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(value)
    }

    pub fn getpeername(&self) -> io::Result<SocketAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut addr_len: libc::socklen_t = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let result = unsafe {
            libc::getpeername(self.fd.as_raw_fd(), &mut storage as *mut _ as *mut libc::sockaddr, &mut addr_len)
        };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }
        raw_to_socket_addr(&storage)
    }

    /// Close the socket now rather than waiting for it to drop.
    pub fn close(self) {}

    /// Extract the underlying fd without closing it: this socket's
    /// watchers are deregistered, but ownership of the fd itself passes to
    /// the caller, who is now responsible for it (spec's `detach()`
    /// invariant — the `Socket` is inert after this call).
    pub fn detach(self) -> RawFd {
        let this = std::mem::ManuallyDrop::new(self);
        reactor::with_reactor(|r| {
            r.remove_watcher(this.io_key, Direction::Read);
            r.remove_watcher(this.io_key, Direction::Write);
            r.deregister_io(this.io_key);
        });
        // SAFETY: `this` is `ManuallyDrop`, so `this.fd` is never dropped
        // through `this` itself; reading it out here and handing it to the
        // caller as a raw fd is the only place it's consumed.
        unsafe { std::ptr::read(&this.fd) }.into_raw_fd()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut addr_len: libc::socklen_t = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let result = unsafe {
            libc::getsockname(self.fd.as_raw_fd(), &mut storage as *mut _ as *mut libc::sockaddr, &mut addr_len)
        };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }
        raw_to_socket_addr(&storage)
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        reactor::with_reactor(|r| {
            r.remove_watcher(self.io_key, Direction::Read);
            r.remove_watcher(self.io_key, Direction::Write);
            r.deregister_io(self.io_key);
        });
    }
}

/// Extension point for TLS or other stream transforms layered over a
/// connected `TcpStream`. `greenloop` ships no implementation of this —
/// wiring up a specific TLS crate is left to the application (spec §1
/// non-goal).
pub trait Connector {
    type Output;
    fn wrap(self, stream: TcpStream) -> Self::Output;
}

pub struct TcpStream(Socket);

impl TcpStream {
    pub async fn connect(addr: SocketAddr) -> Result<Self, GreenError> {
        Socket::connect(Domain::for_addr(&addr), Type::Stream, addr).await.map(TcpStream)
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, GreenError> {
        self.0.read(buf).await
    }

    pub async fn recv_into(&self, buf: &mut [u8]) -> Result<usize, GreenError> {
        self.0.recv_into(buf).await
    }

    pub async fn write(&self, buf: &[u8]) -> Result<usize, GreenError> {
        self.0.write(buf).await
    }

    pub async fn sendall(&self, buf: &[u8]) -> Result<(), GreenError> {
        self.0.sendall(buf).await
    }

    pub fn settimeout(&self, timeout: Option<Duration>) {
        self.0.settimeout(timeout);
    }

    pub fn gettimeout(&self) -> Option<Duration> {
        self.0.gettimeout()
    }

    pub fn setblocking(&self, blocking: bool) {
        self.0.setblocking(blocking);
    }

    pub fn setsockopt(&self, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
        self.0.setsockopt(level, name, value)
    }

    pub fn getsockopt(&self, level: libc::c_int, name: libc::c_int) -> io::Result<libc::c_int> {
        self.0.getsockopt(level, name)
    }

    pub fn getpeername(&self) -> io::Result<SocketAddr> {
        self.0.getpeername()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    pub fn close(self) {
        self.0.close();
    }

    pub fn detach(self) -> RawFd {
        self.0.detach()
    }
}

pub struct TcpListener(Socket);

impl TcpListener {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Socket::bind(Domain::for_addr(&addr), Type::Stream, addr)?;
        socket.listen(1024)?;
        Ok(TcpListener(socket))
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), GreenError> {
        let (socket, addr) = self.0.accept().await?;
        Ok((TcpStream(socket), addr))
    }

    pub fn settimeout(&self, timeout: Option<Duration>) {
        self.0.settimeout(timeout);
    }

    pub fn gettimeout(&self) -> Option<Duration> {
        self.0.gettimeout()
    }

    pub fn setblocking(&self, blocking: bool) {
        self.0.setblocking(blocking);
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    pub fn close(self) {
        self.0.close();
    }

    pub fn detach(self) -> RawFd {
        self.0.detach()
    }
}

pub struct UdpSocket(Socket);

impl UdpSocket {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(UdpSocket(Socket::bind(Domain::for_addr(&addr), Type::Datagram, addr)?))
    }

    pub fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        let (raw_addr, addr_len) = socket_addr_to_raw(&addr);
        let result =
            unsafe { libc::connect(self.0.as_raw_fd(), &raw_addr as *const _ as *const libc::sockaddr, addr_len) };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, GreenError> {
        self.0.send_to(buf, addr).await
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), GreenError> {
        self.0.recv_from(buf).await
    }

    pub async fn send(&self, buf: &[u8]) -> Result<usize, GreenError> {
        self.0.write(buf).await
    }

    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, GreenError> {
        self.0.read(buf).await
    }

    pub async fn recv_into(&self, buf: &mut [u8]) -> Result<usize, GreenError> {
        self.0.recv_into(buf).await
    }

    pub async fn recvfrom_into(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), GreenError> {
        self.0.recvfrom_into(buf).await
    }

    pub fn settimeout(&self, timeout: Option<Duration>) {
        self.0.settimeout(timeout);
    }

    pub fn gettimeout(&self) -> Option<Duration> {
        self.0.gettimeout()
    }

    pub fn setblocking(&self, blocking: bool) {
        self.0.setblocking(blocking);
    }

    pub fn setsockopt(&self, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
        self.0.setsockopt(level, name, value)
    }

    pub fn getsockopt(&self, level: libc::c_int, name: libc::c_int) -> io::Result<libc::c_int> {
        self.0.getsockopt(level, name)
    }

    pub fn getpeername(&self) -> io::Result<SocketAddr> {
        self.0.getpeername()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    pub fn close(self) {
        self.0.close();
    }

    pub fn detach(self) -> RawFd {
        self.0.detach()
    }
}

/// A buffered file-like wrapper over a connected socket (spec §4.F
/// `makefile()`). Cloning one bumps a shared refcount; the fd is only
/// actually closed once every clone is dropped.
pub struct SocketFile {
    inner: std::rc::Rc<Socket>,
}

impl SocketFile {
    pub fn new(socket: Socket) -> Self {
        SocketFile { inner: std::rc::Rc::new(socket) }
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, GreenError> {
        self.inner.read(buf).await
    }

    pub async fn write(&self, buf: &[u8]) -> Result<usize, GreenError> {
        self.inner.write(buf).await
    }
}

impl Clone for SocketFile {
    fn clone(&self) -> Self {
        SocketFile { inner: self.inner.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_addr_v4_roundtrip() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let (raw, _len) = socket_addr_to_raw(&addr);
        assert_eq!(raw_to_socket_addr(&raw).unwrap(), addr);
    }

    #[test]
    fn socket_addr_v6_roundtrip() {
        let addr: SocketAddr = "[::1]:9090".parse().unwrap();
        let (raw, _len) = socket_addr_to_raw(&addr);
        assert_eq!(raw_to_socket_addr(&raw).unwrap(), addr);
    }

    #[test]
    fn unknown_address_family_errors() {
        let storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        assert!(raw_to_socket_addr(&storage).is_err());
    }

    #[test]
    fn bind_and_accept_echo_roundtrip() {
        greenloop_core::block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
            let addr = listener.local_addr().unwrap();

            let server = greenloop_core::spawn(async move {
                let (stream, _peer) = listener.accept().await.unwrap();
                let mut buf = [0u8; 5];
                let n = stream.read(&mut buf).await.unwrap();
                stream.write(&buf[..n]).await.unwrap();
            });

            let client = TcpStream::connect(addr).await.unwrap();
            client.write(b"hello").await.unwrap();
            let mut buf = [0u8; 5];
            let n = client.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"hello");
            let _ = server.wait().await;
        });
    }

    #[test]
    fn read_after_peer_close_reports_eof_not_error() {
        greenloop_core::block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
            let addr = listener.local_addr().unwrap();

            let server = greenloop_core::spawn(async move {
                let (stream, _peer) = listener.accept().await.unwrap();
                stream.close();
            });

            let client = TcpStream::connect(addr).await.unwrap();
            let _ = server.wait().await;

            let mut buf = [0u8; 16];
            let n = client.read(&mut buf).await.unwrap();
            assert_eq!(n, 0);
        });
    }

    #[test]
    fn settimeout_zero_never_trampolines() {
        greenloop_core::block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
            let addr = listener.local_addr().unwrap();
            let client = TcpStream::connect(addr).await.unwrap();
            client.settimeout(Some(Duration::ZERO));
            assert_eq!(client.gettimeout(), Some(Duration::ZERO));

            // Nothing was ever written, so a non-blocking read must fail
            // immediately with a blocking-style I/O error rather than
            // suspend the task.
            let mut buf = [0u8; 8];
            let result = client.read(&mut buf).await;
            assert!(matches!(result, Err(GreenError::Io(_))));
        });
    }
}
