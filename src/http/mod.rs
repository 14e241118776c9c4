//! HTTP/1.x server core
//!
//! Turns raw bytes from an accepted connection into an [`HttpRequest`], hands
//! it to a [`RequestHandler`], and writes the returned [`Response`] back.
//!
//! # Architecture
//!
//! - [`framing`] drives `recv()` until a complete head and body are buffered
//! - [`parser`] turns a buffered head into a request line and [`Headers`]
//! - [`response`] serializes whole and streamed responses
//! - [`server`] owns the listening socket and the worker pool
//!
//! # Examples
//!
//! ```no_run
//! use h1serve::config::ServerConfig;
//! use h1serve::http::{HandlerResult, HttpRequest, HttpResponse, HttpServer, Status};
//! use h1serve::net::Connection;
//!
//! fn hello(request: HttpRequest, _conn: &Connection) -> HandlerResult {
//!     let body = format!("you asked for {}", request.path());
//!     Ok(HttpResponse::builder()
//!         .status(Status::OK)
//!         .header("Content-Type", "text/plain")
//!         .body(body)
//!         .build()
//!         .into())
//! }
//!
//! let config = ServerConfig::builder().port(8080).build().unwrap();
//! let server = HttpServer::new(config, hello);
//! server.listen_and_serve().unwrap();
//! ```

pub mod chunked;
pub mod framing;
pub mod headers;
pub mod message;
pub mod parser;
pub mod response;
pub mod server;

pub use framing::{FrameLimits, MessageReader, RawRequestBuffer};
pub use headers::Headers;
pub use message::{HttpRequest, HttpRequestBuilder, Method, Status, Version};
pub use parser::{RequestHead, ResponseHead};
pub use response::{ChunkSource, HttpResponse, HttpResponseBuilder, Response, StreamingResponse};
pub use server::{HandlerError, HandlerResult, HttpServer, RequestHandler, ServerState};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] crate::net::Error),

    #[error("Thread pool error: {0}")]
    Pool(#[from] crate::pool::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Entity too large: {what} exceeds {limit} bytes")]
    EntityTooLarge { what: &'static str, limit: usize },

    #[error("Connection closed before the header block was terminated")]
    MissingHeaderDelimiter,

    #[error("Body length mismatch: expected {expected} bytes, got {actual}")]
    BodyLengthMismatch { expected: usize, actual: usize },

    #[error("Multipart content type without a boundary")]
    MissingBoundary,

    #[error("Incomplete message")]
    Incomplete,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server is already listening")]
    AlreadyListening,

    #[error("Server already finished")]
    ServerFinished,
}

/// Size of the scratch buffer each `recv()` reads into
pub const RECV_BUFFER_SIZE: usize = 8192 * 8 - 1;

/// Header block terminator
pub const HEADER_DELIMITER: &[u8] = b"\r\n\r\n";

/// CRLF line ending
pub const CRLF: &str = "\r\n";
