//! Accepted client connection

use super::Result;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// One accepted TCP connection
///
/// The connection is closed when dropped, so every exit path of the worker
/// that owns it (normal return, error, panic) releases the client.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer_addr: Option<SocketAddr>,
    opened_at: Instant,
    closed: bool,
}

impl Connection {
    /// Wrap an accepted stream
    pub fn new(stream: TcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok();
        Connection {
            stream,
            peer_addr,
            opened_at: Instant::now(),
            closed: false,
        }
    }

    /// Address of the client, if the OS could report it
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// When the connection was accepted
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Time since the connection was accepted
    pub fn elapsed(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Check whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Shut the connection down in both directions
    ///
    /// Idempotent. A peer that already went away is not an error.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
