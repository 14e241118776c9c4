//! h1serve - blocking HTTP/1.x server core
//!
//! A listening socket, a fixed pool of worker threads, and the framing
//! needed to turn bytes from a connection into one request and write one
//! response back. Every connection carries exactly one request.

pub mod config;
pub mod http;
pub mod log;
pub mod net;
pub mod pool;
