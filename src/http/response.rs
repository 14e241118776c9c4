//! Response types and wire serialization
//!
//! A handler answers with a [`Response`]: either a [`HttpResponse`] whose
//! body is fully in memory, or a [`StreamingResponse`] that pulls its body
//! from a [`ChunkSource`] while it is being written.

use super::chunked::ChunkedEncoder;
use super::{Error, Headers, Result, Status, Version, CRLF};
use bytes::Bytes;
use std::fmt;
use std::io::{self, Write};

/// HTTP response with an in-memory body
#[derive(Debug, Clone)]
pub struct HttpResponse {
    version: Version,
    status: Status,
    reason: String,
    headers: Headers,
    body: Bytes,
}

impl HttpResponse {
    /// Empty HTTP/1.1 response with the canonical reason phrase
    pub fn new(status: Status) -> Self {
        HttpResponse {
            version: Version::default(),
            status,
            reason: status.reason_phrase().to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Start building a `200 OK` response
    pub fn builder() -> HttpResponseBuilder {
        HttpResponseBuilder::default()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serialize into a single buffer
    ///
    /// `Content-Length` is filled in from the body when the response does
    /// not declare one and its status allows a body.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128 + self.body.len());

        write_status_line(&mut buf, self.version, self.status, &self.reason);
        self.headers.write_to(&mut buf);
        if self.status.allows_body() && !self.headers.contains("Content-Length") {
            buf.extend_from_slice(format!("Content-Length: {}{}", self.body.len(), CRLF).as_bytes());
        }
        buf.extend_from_slice(CRLF.as_bytes());
        buf.extend_from_slice(&self.body);

        buf
    }
}

/// Builder for HTTP responses
#[derive(Debug, Default)]
pub struct HttpResponseBuilder {
    version: Option<Version>,
    status: Option<Status>,
    reason: Option<String>,
    headers: Headers,
    body: Bytes,
}

impl HttpResponseBuilder {
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Override the canonical reason phrase
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Content-Length is filled in when the response is serialized
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> HttpResponse {
        let status = self.status.unwrap_or(Status::OK);
        let reason = self
            .reason
            .unwrap_or_else(|| status.reason_phrase().to_string());

        HttpResponse {
            version: self.version.unwrap_or_default(),
            status,
            reason,
            headers: self.headers,
            body: self.body,
        }
    }
}

/// Producer of a streamed response body
///
/// The server calls [`next_chunk`](ChunkSource::next_chunk) until it returns
/// an empty chunk or an error, then calls [`close`](ChunkSource::close)
/// exactly once.
pub trait ChunkSource: Send {
    fn next_chunk(&mut self) -> io::Result<Bytes>;

    fn close(&mut self) {}
}

/// Chunk source over an iterator of byte chunks
struct IterSource<I> {
    chunks: I,
}

impl<I> ChunkSource for IterSource<I>
where
    I: Iterator<Item = Bytes> + Send,
{
    fn next_chunk(&mut self) -> io::Result<Bytes> {
        // Empty items would end the stream early.
        Ok(self
            .chunks
            .by_ref()
            .find(|chunk| !chunk.is_empty())
            .unwrap_or_default())
    }
}

/// HTTP response whose body is produced while it is written
pub struct StreamingResponse {
    version: Version,
    status: Status,
    reason: String,
    headers: Headers,
    source: Box<dyn ChunkSource>,
}

impl StreamingResponse {
    /// Stream the chunks produced by `source`
    pub fn new(status: Status, source: impl ChunkSource + 'static) -> Self {
        StreamingResponse {
            version: Version::default(),
            status,
            reason: status.reason_phrase().to_string(),
            headers: Headers::new(),
            source: Box::new(source),
        }
    }

    /// Stream the items of an iterator
    pub fn from_chunks<I>(status: Status, chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        Self::new(
            status,
            IterSource {
                chunks: chunks.into_iter(),
            },
        )
    }

    /// Add a header
    ///
    /// A `Content-Length` here switches the body from chunked coding to a
    /// fixed length that the source must produce exactly.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Write the head, then every chunk the source yields
    ///
    /// The body is chunk-encoded unless the response declares a
    /// `Content-Length`, in which case chunks are written as-is and must add
    /// up to exactly that length. The source is closed whether or not
    /// writing succeeds.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> Result<()> {
        let result = self.write_inner(writer);
        self.source.close();
        result
    }

    fn write_inner<W: Write>(&mut self, writer: &mut W) -> Result<()> {
        let declared = self.headers.content_length()?;
        self.headers.remove("Transfer-Encoding");
        if declared.is_none() {
            self.headers.insert("Transfer-Encoding", "chunked");
        }

        let mut head = Vec::with_capacity(128);
        write_status_line(&mut head, self.version, self.status, &self.reason);
        self.headers.write_to(&mut head);
        head.extend_from_slice(CRLF.as_bytes());
        writer.write_all(&head)?;

        let Some(expected) = declared else {
            let mut encoder = ChunkedEncoder::new(writer);
            loop {
                let chunk = self.source.next_chunk()?;
                if chunk.is_empty() {
                    break;
                }
                encoder.write_chunk(&chunk)?;
            }
            return encoder.finish();
        };

        // The declared length is the only framing the peer gets.
        let mut written = 0;
        loop {
            let chunk = self.source.next_chunk()?;
            if chunk.is_empty() {
                break;
            }
            written += chunk.len();
            if written > expected {
                return Err(Error::BodyLengthMismatch {
                    expected,
                    actual: written,
                });
            }
            writer.write_all(&chunk)?;
        }
        writer.flush()?;

        if written != expected {
            return Err(Error::BodyLengthMismatch {
                expected,
                actual: written,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("version", &self.version)
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// What a request handler hands back to the server
#[derive(Debug)]
pub enum Response {
    Whole(HttpResponse),
    Streaming(StreamingResponse),
}

impl Response {
    pub fn status(&self) -> Status {
        match self {
            Response::Whole(response) => response.status(),
            Response::Streaming(response) => response.status(),
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            Response::Whole(response) => response.headers_mut(),
            Response::Streaming(response) => response.headers_mut(),
        }
    }

    /// Serialize onto `writer`, marking the connection for closing
    ///
    /// A whole response drops any `Transfer-Encoding` the handler set.
    pub fn write_to<W: Write>(mut self, writer: &mut W) -> Result<()> {
        self.headers_mut().set("Connection", "close");

        match self {
            Response::Whole(mut response) => {
                // A whole body is always framed by its length.
                response.headers_mut().remove("Transfer-Encoding");
                writer.write_all(&response.to_wire())?;
                writer.flush()?;
                Ok(())
            }
            Response::Streaming(mut response) => response.write_to(writer),
        }
    }
}

impl From<HttpResponse> for Response {
    fn from(response: HttpResponse) -> Self {
        Response::Whole(response)
    }
}

impl From<StreamingResponse> for Response {
    fn from(response: StreamingResponse) -> Self {
        Response::Streaming(response)
    }
}

fn write_status_line(buf: &mut Vec<u8>, version: Version, status: Status, reason: &str) {
    buf.extend_from_slice(version.as_str().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(status.code().to_string().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(reason.as_bytes());
    buf.extend_from_slice(CRLF.as_bytes());
}
