//! Message framing
//!
//! Sockets deliver bytes in whatever pieces the network produced, with no
//! regard for where a header block or body ends. [`MessageReader`] loops
//! over `recv()` in two phases:
//!
//! 1. **Head**: accumulate until `\r\n\r\n` appears or the header ceiling is
//!    exceeded. Bytes read past the delimiter are kept as the start of the
//!    body.
//! 2. **Body**: with a `Content-Length`, accumulate exactly that many bytes;
//!    with chunked transfer coding, decode until the last chunk. Otherwise a
//!    request has no body.
//!
//! Read errors are classified with [`classify_read_error`]: transient ones
//! are retried, a reset or disconnected peer ends the input, and anything
//! else aborts.

use super::chunked::ChunkedDecoder;
use super::parser::{self, RequestHead};
use super::{Error, Headers, HttpRequest, HttpResponse, Result, RECV_BUFFER_SIZE};
use crate::config::{ServerConfig, DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_HEADER_SIZE};
use crate::net::{classify_read_error, ReadErrorClass};
use bytes::{Buf, BytesMut};
use std::io::Read;

/// Size limits applied while reading a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Ceiling on the header block, delimiter included
    pub max_header_size: usize,
    /// Ceiling on the decoded body
    pub max_body_size: usize,
    /// Largest single `recv()`
    pub recv_buffer_size: usize,
}

impl FrameLimits {
    pub fn from_config(config: &ServerConfig) -> Self {
        FrameLimits {
            max_header_size: config.max_header_size(),
            max_body_size: config.max_body_size(),
            recv_buffer_size: RECV_BUFFER_SIZE,
        }
    }
}

impl Default for FrameLimits {
    fn default() -> Self {
        FrameLimits {
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            recv_buffer_size: RECV_BUFFER_SIZE,
        }
    }
}

/// Bytes collected for one message
#[derive(Debug, Default)]
pub struct RawRequestBuffer {
    head: BytesMut,
    body: BytesMut,
    content_length: Option<usize>,
    boundary: Option<String>,
}

impl RawRequestBuffer {
    /// Header block, without the terminating blank line
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// Body bytes accumulated so far
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Declared `Content-Length`, once the body phase has seen the headers
    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Multipart boundary, once the body phase has seen the headers
    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    /// Consume the buffer into a request
    pub fn into_request(self, head: RequestHead) -> HttpRequest {
        HttpRequest::builder()
            .method(head.method)
            .target(head.target)
            .version(head.version)
            .headers(head.headers)
            .body(self.body.freeze())
            .boundary(self.boundary)
            .build()
    }
}

/// Reads framed HTTP messages from a byte stream
pub struct MessageReader<R: Read> {
    reader: R,
    limits: FrameLimits,
    scratch: Vec<u8>,
}

impl<R: Read> MessageReader<R> {
    /// Wrap `reader`; nothing is read until a request or response is asked for
    pub fn new(reader: R, limits: FrameLimits) -> Self {
        MessageReader {
            reader,
            limits,
            scratch: Vec::new(),
        }
    }

    /// Get a mutable reference to the underlying reader
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Unwrap the reader
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read and parse one complete request
    pub fn read_request(&mut self) -> Result<HttpRequest> {
        let mut raw = self.read_head()?;
        let head = parser::parse_request_head(raw.head())?;
        self.read_body(&mut raw, &head.headers)?;
        Ok(raw.into_request(head))
    }

    /// Read and parse one complete response
    ///
    /// A response with neither a length nor chunked coding runs to the end
    /// of the stream.
    pub fn read_response(&mut self) -> Result<HttpResponse> {
        let mut raw = self.read_head()?;
        let head = parser::parse_response_head(raw.head())?;

        if !head.status.allows_body() {
            raw.body.clear();
        } else if head.headers.content_length()?.is_some() || head.headers.is_chunked() {
            self.read_body(&mut raw, &head.headers)?;
        } else {
            self.read_to_end(&mut raw)?;
        }

        let mut response = HttpResponse::builder()
            .version(head.version)
            .status(head.status)
            .reason(head.reason)
            .body(raw.body.freeze())
            .build();
        *response.headers_mut() = head.headers;
        Ok(response)
    }

    /// Header phase
    ///
    /// Returns the header block and whatever body bytes arrived with it.
    pub fn read_head(&mut self) -> Result<RawRequestBuffer> {
        let max = self.limits.max_header_size;
        let mut buf = BytesMut::with_capacity(4096);

        loop {
            let n = self.recv(self.limits.recv_buffer_size)?;
            if n == 0 {
                return Err(if buf.is_empty() {
                    Error::ConnectionClosed
                } else {
                    Error::MissingHeaderDelimiter
                });
            }

            // The delimiter may straddle the previous read.
            let search_from = buf.len().saturating_sub(3);
            buf.extend_from_slice(&self.scratch[..n]);

            if let Some(end) = parser::find_header_end(&buf, search_from) {
                if end + 4 > max {
                    return Err(Error::EntityTooLarge {
                        what: "header block",
                        limit: max,
                    });
                }

                let body = buf.split_off(end + 4);
                buf.truncate(end);
                return Ok(RawRequestBuffer {
                    head: buf,
                    body,
                    ..RawRequestBuffer::default()
                });
            }

            if buf.len() > max {
                return Err(Error::EntityTooLarge {
                    what: "header block",
                    limit: max,
                });
            }
        }
    }

    /// Body phase
    ///
    /// Without a `Content-Length` or chunked coding the body is empty and any
    /// bytes that followed the head are discarded.
    pub fn read_body(&mut self, raw: &mut RawRequestBuffer, headers: &Headers) -> Result<()> {
        raw.boundary = headers.multipart_boundary()?;

        if let Some(length) = headers.content_length()? {
            raw.content_length = Some(length);
            return self.read_sized_body(raw, length);
        }

        if headers.is_chunked() {
            return self.read_chunked_body(raw);
        }

        raw.body.clear();
        Ok(())
    }

    fn read_sized_body(&mut self, raw: &mut RawRequestBuffer, length: usize) -> Result<()> {
        if length > self.limits.max_body_size {
            return Err(Error::EntityTooLarge {
                what: "request body",
                limit: self.limits.max_body_size,
            });
        }

        raw.body.reserve(length.saturating_sub(raw.body.len()));

        while raw.body.len() < length {
            let n = self.recv(length - raw.body.len())?;
            if n == 0 {
                break;
            }
            raw.body.extend_from_slice(&self.scratch[..n]);
        }

        if raw.body.len() != length {
            return Err(Error::BodyLengthMismatch {
                expected: length,
                actual: raw.body.len(),
            });
        }

        Ok(())
    }

    fn read_chunked_body(&mut self, raw: &mut RawRequestBuffer) -> Result<()> {
        let mut decoder = ChunkedDecoder::with_limit(self.limits.max_body_size);
        let mut pending = std::mem::take(&mut raw.body);
        let mut decoded = BytesMut::new();

        loop {
            let (consumed, complete) = decoder.decode(&pending, &mut decoded)?;
            pending.advance(consumed);
            if complete {
                break;
            }

            // Only chunk-size and trailer lines are ever left pending.
            if pending.len() > self.limits.max_header_size {
                return Err(Error::EntityTooLarge {
                    what: "chunk header",
                    limit: self.limits.max_header_size,
                });
            }

            let n = self.recv(self.limits.recv_buffer_size)?;
            if n == 0 {
                return Err(Error::Incomplete);
            }
            pending.extend_from_slice(&self.scratch[..n]);
        }

        raw.body = decoded;
        Ok(())
    }

    fn read_to_end(&mut self, raw: &mut RawRequestBuffer) -> Result<()> {
        loop {
            if raw.body.len() > self.limits.max_body_size {
                return Err(Error::EntityTooLarge {
                    what: "response body",
                    limit: self.limits.max_body_size,
                });
            }

            let n = self.recv(self.limits.recv_buffer_size)?;
            if n == 0 {
                return Ok(());
            }
            raw.body.extend_from_slice(&self.scratch[..n]);
        }
    }

    /// One `recv()` of at most `max` bytes into the scratch buffer
    ///
    /// Returns 0 at end of input, including a reset or disconnected peer.
    fn recv(&mut self, max: usize) -> Result<usize> {
        if self.scratch.len() < self.limits.recv_buffer_size {
            self.scratch.resize(self.limits.recv_buffer_size, 0);
        }
        let len = max.min(self.scratch.len());

        loop {
            match self.reader.read(&mut self.scratch[..len]) {
                Ok(n) => return Ok(n),
                Err(e) => match classify_read_error(&e) {
                    ReadErrorClass::Transient => continue,
                    ReadErrorClass::Disconnected => return Ok(0),
                    ReadErrorClass::Fatal => return Err(Error::Io(e)),
                },
            }
        }
    }
}
