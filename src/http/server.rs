//! HTTP server
//!
//! [`HttpServer`] owns the listening socket and a [`ThreadPool`]. The thread
//! calling [`listen_and_serve`](HttpServer::listen_and_serve) accepts
//! connections and pushes one task per connection; each task reads a single
//! request, hands it to the [`RequestHandler`], writes the response and
//! closes the connection.

use super::framing::{FrameLimits, MessageReader};
use super::{Error, HttpRequest, Response, Result};
use crate::config::ServerConfig;
use crate::log::{default_logger, SharedLogger};
use crate::net::{self, Connection, Socket};
use crate::pool::ThreadPool;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Pause after the first of a run of failed accepts
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Longest pause between failed accepts
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_millis(500);

/// Error a handler may fail with
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What a handler returns
pub type HandlerResult = std::result::Result<Response, HandlerError>;

/// Application callback invoked once per request
///
/// Called concurrently from worker threads. The request is handed over by
/// value; the connection is borrowed for inspection only, the server writes
/// the returned response itself.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: HttpRequest, connection: &Connection) -> HandlerResult;
}

impl<F> RequestHandler for F
where
    F: Fn(HttpRequest, &Connection) -> HandlerResult + Send + Sync,
{
    fn handle(&self, request: HttpRequest, connection: &Connection) -> HandlerResult {
        self(request, connection)
    }
}

/// Server lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Listening,
    Finished,
}

/// State shared with every connection task
struct ConnectionContext {
    handler: Arc<dyn RequestHandler>,
    logger: SharedLogger,
    limits: FrameLimits,
    verbose: bool,
}

impl ConnectionContext {
    fn serve(&self, mut connection: Connection) {
        let peer = describe_peer(&connection);

        let request = match MessageReader::new(&mut connection, self.limits).read_request() {
            Ok(request) => request,
            Err(Error::ConnectionClosed) => {
                self.logger
                    .debug(&format!("{peer}: closed without sending a request"));
                return;
            }
            Err(e) => {
                self.logger
                    .error(&format!("{peer}: failed to read request: {e}"));
                return;
            }
        };

        let method = request.method();
        let path = request.path().to_string();

        let response = match self.handler.handle(request, &connection) {
            Ok(response) => response,
            Err(e) => {
                self.logger
                    .error(&format!("{peer}: handler failed for {method} {path}: {e}"));
                return;
            }
        };

        let status = response.status();
        if let Err(e) = write_response(response, &mut connection) {
            self.logger
                .error(&format!("{peer}: failed to send response: {e}"));
        }

        if self.verbose {
            self.logger.debug(&format!(
                "{method} {path} -> {} ({:?})",
                status.code(),
                connection.elapsed()
            ));
        }

        if let Err(e) = connection.close() {
            self.logger.debug(&format!("{peer}: close failed: {e}"));
        }
    }
}

/// Multithreaded HTTP/1.x server
///
/// All methods take `&self`: share the server in an `Arc` to call
/// [`finish`](HttpServer::finish) from another thread while
/// [`listen_and_serve`](HttpServer::listen_and_serve) blocks.
pub struct HttpServer {
    config: ServerConfig,
    context: Arc<ConnectionContext>,
    state: Mutex<ServerState>,
    listener: Mutex<Option<Arc<Socket>>>,
}

impl HttpServer {
    /// Create a server that logs through `tracing`
    pub fn new<H>(config: ServerConfig, handler: H) -> Self
    where
        H: RequestHandler + 'static,
    {
        Self::with_logger(config, handler, default_logger())
    }

    /// Create a server that reports errors to `logger`
    ///
    /// The logger is shared with the worker pool and every connection task.
    pub fn with_logger<H>(config: ServerConfig, handler: H, logger: SharedLogger) -> Self
    where
        H: RequestHandler + 'static,
    {
        let context = ConnectionContext {
            handler: Arc::new(handler),
            logger,
            limits: FrameLimits::from_config(&config),
            verbose: config.verbose(),
        };

        HttpServer {
            config,
            context: Arc::new(context),
            state: Mutex::new(ServerState::Created),
            listener: Mutex::new(None),
        }
    }

    /// Configuration the server was created with
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        *self.lock_state()
    }

    /// Bound address while listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_listener()
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    /// Bind, listen and serve until [`finish`](HttpServer::finish) is called
    ///
    /// Fails without serving when the socket cannot be created, bound or
    /// put into listening mode. Returns once the accept loop has stopped and
    /// every accepted connection has been handled.
    pub fn listen_and_serve(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            match *state {
                ServerState::Created => *state = ServerState::Listening,
                ServerState::Listening => return Err(Error::AlreadyListening),
                ServerState::Finished => return Err(Error::ServerFinished),
            }
        }

        let socket = match self.open_listener() {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                *self.lock_state() = ServerState::Finished;
                return Err(e.into());
            }
        };

        let pool = match self.start_pool() {
            Ok(pool) => pool,
            Err(e) => {
                self.context
                    .logger
                    .fatal(&format!("failed to start worker pool: {e}"));
                let _ = socket.close();
                *self.lock_state() = ServerState::Finished;
                return Err(e.into());
            }
        };

        {
            let state = self.lock_state();
            if *state == ServerState::Finished {
                // finish() ran while the socket was being set up.
                let _ = socket.close();
                return Ok(());
            }
            *self.lock_listener() = Some(Arc::clone(&socket));
        }

        self.accept_loop(&socket, &pool);

        // Dropping the pool drains queued connections and joins the workers.
        drop(pool);
        Ok(())
    }

    /// Stop accepting connections
    ///
    /// Idempotent, and safe to call before, during or without
    /// [`listen_and_serve`](HttpServer::listen_and_serve). Connections
    /// already accepted are still served.
    pub fn finish(&self) {
        let listener = {
            let mut state = self.lock_state();
            *state = ServerState::Finished;
            self.lock_listener().take()
        };

        let Some(socket) = listener else {
            return;
        };

        let wake_addr = socket.local_addr().ok().map(connectable);
        if let Err(e) = socket.close() {
            self.context
                .logger
                .error(&format!("failed to close listening socket: {e}"));
        }

        // Not every platform wakes a blocked accept() on shutdown.
        if let Some(addr) = wake_addr {
            let _ = TcpStream::connect_timeout(&addr, Duration::from_secs(1));
        }
    }

    /// Serialize `response` onto `connection`
    pub fn send(&self, response: Response, connection: &mut Connection) -> Result<()> {
        write_response(response, connection)
    }

    fn open_listener(&self) -> net::Result<Socket> {
        let config = &self.config;
        let logger = &self.context.logger;
        let fail = |step: &str, e: net::Error| {
            logger.fatal(&format!(
                "{step} failed for {}:{}: {e}",
                config.host(),
                config.port()
            ));
            e
        };

        let socket = Socket::create(config.host(), config.port(), config.use_ipv6())
            .map_err(|e| fail("socket creation", e))?;
        socket
            .set_reuse_addr()
            .map_err(|e| fail("setting SO_REUSEADDR", e))?;
        socket.bind().map_err(|e| fail("bind", e))?;
        socket.listen().map_err(|e| fail("listen", e))?;

        Ok(socket)
    }

    fn start_pool(&self) -> crate::pool::Result<ThreadPool> {
        let logger = Arc::clone(&self.context.logger);
        match self.config.queue_capacity() {
            Some(capacity) => ThreadPool::with_capacity(self.config.workers(), capacity, logger),
            None => ThreadPool::new(self.config.workers(), logger),
        }
    }

    fn accept_loop(&self, socket: &Socket, pool: &ThreadPool) {
        let logger = &self.context.logger;
        let mut backoff = Duration::ZERO;

        loop {
            let connection = match socket.accept() {
                Ok(connection) => connection,
                Err(net::Error::Closed) => break,
                Err(_) if socket.is_closed() => break,
                Err(e) => {
                    // Errors such as EMFILE persist until descriptors free up.
                    backoff = next_backoff(backoff);
                    logger.error(&format!("accept failed: {e}; retrying in {backoff:?}"));
                    thread::sleep(backoff);
                    continue;
                }
            };
            backoff = Duration::ZERO;

            let context = Arc::clone(&self.context);
            if let Err(e) = pool.push(move || context.serve(connection)) {
                logger.error(&format!("dropping connection: {e}"));
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<Arc<Socket>>> {
        self.listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.finish();
    }
}

fn write_response(response: Response, connection: &mut Connection) -> Result<()> {
    response.write_to(connection)
}

fn describe_peer(connection: &Connection) -> String {
    connection
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown peer".to_string())
}

fn next_backoff(previous: Duration) -> Duration {
    (previous * 2).clamp(ACCEPT_BACKOFF_MIN, ACCEPT_BACKOFF_MAX)
}

/// Loopback equivalent of a wildcard bind address
fn connectable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}
