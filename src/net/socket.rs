//! Listening socket
//!
//! [`Socket`] wraps the raw OS socket with the handful of calls the server
//! needs, in the order it needs them: `create`, `set_reuse_addr`, `bind`,
//! `listen`, then `accept` until `close`.

use super::{Connection, Error, Result};
use socket2::{Domain, Protocol, SockAddr, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};

/// Address family of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    fn from_flag(use_ipv6: bool) -> Self {
        if use_ipv6 {
            AddressFamily::Ipv6
        } else {
            AddressFamily::Ipv4
        }
    }

    fn domain(self) -> Domain {
        match self {
            AddressFamily::Ipv4 => Domain::IPV4,
            AddressFamily::Ipv6 => Domain::IPV6,
        }
    }

    fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            AddressFamily::Ipv4 => addr.is_ipv4(),
            AddressFamily::Ipv6 => addr.is_ipv6(),
        }
    }

    fn unspecified(self) -> IpAddr {
        match self {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

/// Listening TCP socket
///
/// Once [`close`](Socket::close) has been called every other operation
/// fails with [`Error::Closed`]. Closing shuts the socket down, which wakes
/// a thread blocked in [`accept`](Socket::accept); the descriptor itself is
/// released only when the `Socket` is dropped, so it cannot be recycled by
/// the OS while another thread still refers to it.
#[derive(Debug)]
pub struct Socket {
    inner: socket2::Socket,
    family: AddressFamily,
    host: String,
    port: u16,
    addr: SocketAddr,
    closed: AtomicBool,
}

impl Socket {
    /// Allocate a stream socket for `host:port`
    ///
    /// `host` may be an IP literal (IPv6 literals optionally bracketed),
    /// a host name, or empty for the unspecified address.
    pub fn create(host: &str, port: u16, use_ipv6: bool) -> Result<Self> {
        let family = AddressFamily::from_flag(use_ipv6);
        let addr = resolve(host, port, family)?;
        let inner = socket2::Socket::new(family.domain(), Type::STREAM, Some(Protocol::TCP))?;

        Ok(Socket {
            inner,
            family,
            host: host.to_string(),
            port,
            addr,
            closed: AtomicBool::new(false),
        })
    }

    /// Set `SO_REUSEADDR` so a restart does not trip over `TIME_WAIT`
    pub fn set_reuse_addr(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner.set_reuse_address(true)?;
        Ok(())
    }

    /// Bind to the address resolved at creation
    pub fn bind(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner
            .bind(&SockAddr::from(self.addr))
            .map_err(|source| match source.kind() {
                io::ErrorKind::AddrInUse => Error::AddressInUse(self.addr),
                io::ErrorKind::AddrNotAvailable => Error::InvalidAddress(self.addr.to_string()),
                _ => Error::Bind {
                    addr: self.addr,
                    source,
                },
            })
    }

    /// Mark the socket passive with the platform's maximum backlog
    pub fn listen(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner.listen(libc::SOMAXCONN)?;
        Ok(())
    }

    /// Block until a client connects
    pub fn accept(&self) -> Result<Connection> {
        self.ensure_open()?;
        let (socket, _) = self.inner.accept()?;

        if self.is_closed() {
            return Err(Error::Closed);
        }

        // Accepted sockets must block regardless of how the listener is set.
        socket.set_nonblocking(false)?;
        Ok(Connection::new(socket.into()))
    }

    /// Toggle blocking mode
    pub fn set_blocking(&self, blocking: bool) -> Result<()> {
        self.ensure_open()?;
        self.inner.set_nonblocking(!blocking)?;
        Ok(())
    }

    /// Close the socket
    ///
    /// Idempotent: closing an already closed socket succeeds.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        match self.inner.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Unbound or never-listening sockets have nothing to shut down.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Check whether [`close`](Socket::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Address actually bound (port 0 resolves to the kernel's choice)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.ensure_open()?;
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or_else(|| Error::InvalidAddress("not an inet socket".to_string()))
    }

    /// Address resolved at creation
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Address family
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Host as given to [`create`](Socket::create)
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port as given to [`create`](Socket::create)
    pub fn port(&self) -> u16 {
        self.port
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}

fn resolve(host: &str, port: u16, family: AddressFamily) -> Result<SocketAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.is_empty() {
        return Ok(SocketAddr::new(family.unspecified(), port));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        let addr = SocketAddr::new(ip, port);
        if !family.matches(&addr) {
            return Err(Error::InvalidAddress(format!(
                "{} is not an {:?} address",
                host, family
            )));
        }
        return Ok(addr);
    }

    let mut candidates = (host, port).to_socket_addrs().map_err(|e| Error::Resolve {
        host: host.to_string(),
        reason: e.to_string(),
    })?;

    candidates
        .find(|addr| family.matches(addr))
        .ok_or_else(|| Error::Resolve {
            host: host.to_string(),
            reason: format!("no {:?} address", family),
        })
}
