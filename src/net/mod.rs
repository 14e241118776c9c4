//! Socket plumbing
//!
//! Thin wrappers over the platform socket calls used by the HTTP server:
//! a listening [`Socket`] and the per-client [`Connection`] it accepts.
//! All failures are reported through [`Error`]; nothing here logs.

pub mod connection;
pub mod socket;

pub use connection::Connection;
pub use socket::{AddressFamily, Socket};

use std::io;
use std::net::SocketAddr;

/// Result type for socket operations
pub type Result<T> = std::result::Result<T, Error>;

/// Socket operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Cannot resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Address already in use: {0}")]
    AddressInUse(SocketAddr),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Socket is closed")]
    Closed,
}

/// How a failed `recv()` should be treated by a reader loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadErrorClass {
    /// Bad descriptor, invalid argument, out of memory and anything
    /// unrecognised: abort the read.
    Fatal,
    /// Interrupted, timed out or would block: read again.
    Transient,
    /// The peer reset or the socket is no longer connected: end of input.
    Disconnected,
}

/// Classify a read error by its OS error code, falling back to its kind
pub fn classify_read_error(err: &io::Error) -> ReadErrorClass {
    #[cfg(unix)]
    {
        if let Some(code) = err.raw_os_error() {
            match code {
                libc::EBADF | libc::EINVAL | libc::ENOMEM | libc::EFAULT => {
                    return ReadErrorClass::Fatal
                }
                libc::EINTR | libc::EAGAIN | libc::ETIMEDOUT => return ReadErrorClass::Transient,
                libc::ECONNRESET | libc::ENOTCONN | libc::ECONNABORTED | libc::EPIPE => {
                    return ReadErrorClass::Disconnected
                }
                _ => {}
            }
        }
    }

    match err.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            ReadErrorClass::Transient
        }
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe => ReadErrorClass::Disconnected,
        _ => ReadErrorClass::Fatal,
    }
}
