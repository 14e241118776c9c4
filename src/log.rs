//! Diagnostic sink
//!
//! The server core never reaches for a process-wide logger. A [`Logger`] is
//! handed to the server at construction and threaded through the thread pool
//! and every connection task.

use std::fmt;
use std::sync::Arc;

/// Sink for error and diagnostic reporting.
///
/// Implementations must not panic: the core calls these from worker threads
/// while unwinding out of failed connections.
pub trait Logger: Send + Sync {
    /// Recoverable failure (a connection, a task, an accept).
    fn error(&self, message: &str);

    /// Diagnostic detail (verbose timings, early disconnects).
    fn debug(&self, message: &str);

    /// Failure that stops the server from serving.
    fn fatal(&self, message: &str);
}

/// Shared logger handle
pub type SharedLogger = Arc<dyn Logger>;

/// Logger that forwards to `tracing`
///
/// Installing a subscriber is left to the application.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }

    fn debug(&self, message: &str) {
        tracing::debug!("{message}");
    }

    fn fatal(&self, message: &str) {
        tracing::error!(fatal = true, "{message}");
    }
}

/// Logger that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn error(&self, _message: &str) {}
    fn debug(&self, _message: &str) {}
    fn fatal(&self, _message: &str) {}
}

impl fmt::Debug for dyn Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Logger")
    }
}

/// Default logger handle used when the caller does not supply one
pub fn default_logger() -> SharedLogger {
    Arc::new(TracingLogger)
}
