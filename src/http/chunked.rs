//! Chunked transfer coding
//!
//! The encoder frames streamed response bodies; the decoder reassembles
//! chunked request bodies (and streamed responses read back by a client).

use super::{Error, Result, CRLF};
use bytes::BytesMut;
use std::io::Write;

/// Writes chunk frames to an underlying writer
pub struct ChunkedEncoder<W: Write> {
    writer: W,
}

impl<W: Write> ChunkedEncoder<W> {
    /// Encode chunks onto `writer`
    pub fn new(writer: W) -> Self {
        ChunkedEncoder { writer }
    }

    /// Write one chunk
    ///
    /// Empty input is skipped: a zero-sized chunk would end the body.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        write!(self.writer, "{:x}{}", data.len(), CRLF)?;
        self.writer.write_all(data)?;
        self.writer.write_all(CRLF.as_bytes())?;
        Ok(())
    }

    /// Write the terminating zero-sized chunk
    pub fn finish(&mut self) -> Result<()> {
        write!(self.writer, "0{}{}", CRLF, CRLF)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Get a mutable reference to the underlying writer
    ///
    /// Writing to it directly corrupts the chunk stream.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Unwrap the writer. Does not write the final chunk.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Size,
    Data { remaining: usize },
    DataEnd,
    Trailer,
    Complete,
}

/// Incremental chunked-body decoder
///
/// Feed it whatever bytes have arrived; it consumes as much as it can and
/// appends decoded data to the output.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: DecoderState,
    decoded: usize,
    limit: Option<usize>,
}

impl ChunkedDecoder {
    /// Decoder without a body size limit
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecoderState::Size,
            decoded: 0,
            limit: None,
        }
    }

    /// Decoder that fails once the decoded body would exceed `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        ChunkedDecoder {
            limit: Some(limit),
            ..Self::new()
        }
    }

    /// Decode from `input`, appending to `output`
    ///
    /// Returns the number of input bytes consumed and whether the final
    /// chunk and trailer have been seen. Unconsumed bytes must be offered
    /// again, with more data appended, on the next call.
    pub fn decode(&mut self, input: &[u8], output: &mut BytesMut) -> Result<(usize, bool)> {
        let mut pos = 0;

        loop {
            match self.state {
                DecoderState::Size => {
                    let Some(end) = find_crlf(&input[pos..]) else {
                        break;
                    };
                    let line = String::from_utf8_lossy(&input[pos..pos + end]);
                    // Chunk extensions follow a semicolon and are ignored.
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    let size = usize::from_str_radix(size_str, 16)
                        .map_err(|_| Error::InvalidChunkSize(size_str.to_string()))?;
                    pos += end + 2;

                    if let Some(limit) = self.limit {
                        if self.decoded.saturating_add(size) > limit {
                            return Err(Error::EntityTooLarge {
                                what: "chunked body",
                                limit,
                            });
                        }
                    }

                    self.state = if size == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::Data { remaining: size }
                    };
                }

                DecoderState::Data { remaining } => {
                    let take = remaining.min(input.len() - pos);
                    if take == 0 {
                        break;
                    }
                    output.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    self.decoded += take;

                    self.state = if take == remaining {
                        DecoderState::DataEnd
                    } else {
                        DecoderState::Data {
                            remaining: remaining - take,
                        }
                    };
                }

                DecoderState::DataEnd => {
                    if input.len() - pos < 2 {
                        break;
                    }
                    if &input[pos..pos + 2] != CRLF.as_bytes() {
                        return Err(Error::Protocol("Expected CRLF after chunk".to_string()));
                    }
                    pos += 2;
                    self.state = DecoderState::Size;
                }

                DecoderState::Trailer => {
                    let Some(end) = find_crlf(&input[pos..]) else {
                        break;
                    };
                    pos += end + 2;
                    // Trailer fields are skipped; the empty line ends the body.
                    if end == 0 {
                        self.state = DecoderState::Complete;
                    }
                }

                DecoderState::Complete => break,
            }
        }

        Ok((pos, self.is_complete()))
    }

    /// True once the last chunk and its trailers were consumed
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }

    /// Total body bytes produced so far
    pub fn decoded(&self) -> usize {
        self.decoded
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF.as_bytes())
}

/// Encode a whole body as chunks of at most `chunk_size` bytes
pub fn encode_chunked_body(data: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() + 16);
    let mut encoder = ChunkedEncoder::new(&mut output);

    for chunk in data.chunks(chunk_size.max(1)) {
        encoder.write_chunk(chunk)?;
    }
    encoder.finish()?;

    Ok(output)
}

/// Decode a complete chunked body
pub fn decode_chunked_body(input: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ChunkedDecoder::new();
    let mut output = BytesMut::new();
    decoder.decode(input, &mut output)?;

    if !decoder.is_complete() {
        return Err(Error::Incomplete);
    }

    Ok(output.to_vec())
}
