//! Message body framing (RFC 9112 §6).
//!
//! Both sides of the proxy read bodies from a growing connection buffer:
//! the server for inbound requests and the client for origin responses.
//! [`BodyLength`] decides how a body is delimited; a [`BodyReader`] extracts
//! it once it is complete, decoding the `chunked` transfer coding as bytes
//! arrive rather than from scratch on every read.

use std::mem;
use std::str;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::{Headers, Method, StatusCode};

/// Errors produced while delimiting or decoding a message body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BodyError {
    #[error("invalid Content-Length header: {0:?}")]
    InvalidContentLength(String),

    #[error("unsupported transfer coding: {0:?}")]
    UnsupportedTransferCoding(String),

    #[error("invalid chunk size line: {0:?}")]
    InvalidChunkSize(String),

    #[error("chunk data is not terminated by CRLF")]
    MalformedChunk,

    #[error("connection closed before the body was complete")]
    Truncated,
}

/// How the end of a message body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// The message has no body.
    Empty,
    /// Exactly this many bytes follow the header block.
    Fixed(usize),
    /// The body uses the `chunked` transfer coding.
    Chunked,
    /// The body runs until the peer closes the connection (responses only).
    UntilClose,
}

impl BodyLength {
    /// Determines the framing of a request body.
    ///
    /// A request without `Transfer-Encoding` or `Content-Length` has no body.
    /// Requests may not be delimited by connection close, so any transfer
    /// coding other than a final `chunked` is rejected.
    pub fn for_request(headers: &Headers) -> Result<Self, BodyError> {
        if let Some(coding) = last_transfer_coding(headers) {
            return if coding.eq_ignore_ascii_case("chunked") {
                Ok(Self::Chunked)
            } else {
                Err(BodyError::UnsupportedTransferCoding(coding.to_owned()))
            };
        }

        match content_length(headers)? {
            Some(0) | None => Ok(Self::Empty),
            Some(n) => Ok(Self::Fixed(n)),
        }
    }

    /// Determines the framing of a response body given the request method
    /// that produced it.
    pub fn for_response(
        method: &Method,
        status: StatusCode,
        headers: &Headers,
    ) -> Result<Self, BodyError> {
        if *method == Method::Head || !status.allows_body() {
            return Ok(Self::Empty);
        }

        if let Some(coding) = last_transfer_coding(headers) {
            return Ok(if coding.eq_ignore_ascii_case("chunked") {
                Self::Chunked
            } else {
                Self::UntilClose
            });
        }

        match content_length(headers)? {
            Some(0) => Ok(Self::Empty),
            Some(n) => Ok(Self::Fixed(n)),
            None => Ok(Self::UntilClose),
        }
    }
}

/// Extracts one body from the front of a growing buffer.
///
/// Call [`take`](Self::take) after every read with the same buffer, only
/// ever extended at the end. Chunked decoding resumes where the previous call
/// stopped, so each byte is looked at once however the body is split.
#[derive(Debug)]
pub struct BodyReader {
    length: BodyLength,
    chunked: ChunkedDecoder,
}

impl BodyReader {
    pub fn new(length: BodyLength) -> Self {
        Self {
            length,
            chunked: ChunkedDecoder::default(),
        }
    }

    /// Returns the decoded body and the number of bytes of `buf` it occupied,
    /// or `Ok(None)` if more data is needed.
    ///
    /// `eof` signals that the peer has closed its side, which completes a
    /// [`BodyLength::UntilClose`] body and turns any other incomplete body
    /// into [`BodyError::Truncated`].
    pub fn take(&mut self, buf: &[u8], eof: bool) -> Result<Option<(Bytes, usize)>, BodyError> {
        let taken = match self.length {
            BodyLength::Empty => Some((Bytes::new(), 0)),
            BodyLength::Fixed(n) => (buf.len() >= n).then(|| (Bytes::copy_from_slice(&buf[..n]), n)),
            BodyLength::Chunked => self.chunked.decode(buf)?,
            BodyLength::UntilClose => eof.then(|| (Bytes::copy_from_slice(buf), buf.len())),
        };

        match taken {
            None if eof => Err(BodyError::Truncated),
            other => Ok(other),
        }
    }
}

fn last_transfer_coding(headers: &Headers) -> Option<&str> {
    headers
        .get_all("transfer-encoding")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .last()
}

// Repeated Content-Length fields are tolerated only when they agree.
fn content_length(headers: &Headers) -> Result<Option<usize>, BodyError> {
    let mut length = None;
    for value in headers.get_all("content-length") {
        let parsed: usize = value
            .trim()
            .parse()
            .map_err(|_| BodyError::InvalidContentLength(value.to_owned()))?;
        match length {
            Some(existing) if existing != parsed => {
                return Err(BodyError::InvalidContentLength(value.to_owned()));
            }
            _ => length = Some(parsed),
        }
    }
    Ok(length)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    #[default]
    Size,
    /// This many data bytes of the current chunk are still to come.
    Data(usize),
    /// Waiting for the CRLF after a chunk's data.
    DataEnd,
    Trailer,
}

/// Resumable `chunked` decoder.
///
/// Chunk extensions are ignored and trailer fields are consumed but dropped.
#[derive(Debug, Default)]
struct ChunkedDecoder {
    /// Input bytes already consumed.
    pos: usize,
    state: ChunkState,
    body: BytesMut,
}

impl ChunkedDecoder {
    fn decode(&mut self, buf: &[u8]) -> Result<Option<(Bytes, usize)>, BodyError> {
        loop {
            let rest = &buf[self.pos..];
            match self.state {
                ChunkState::Size => {
                    let Some(line_len) = find_crlf(rest) else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&rest[..line_len])?;
                    self.pos += line_len + 2;
                    self.state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    let n = remaining.min(rest.len());
                    self.body.extend_from_slice(&rest[..n]);
                    self.pos += n;
                    if n < remaining {
                        self.state = ChunkState::Data(remaining - n);
                        return Ok(None);
                    }
                    self.state = ChunkState::DataEnd;
                }
                ChunkState::DataEnd => {
                    if rest.len() < 2 {
                        return Ok(None);
                    }
                    if &rest[..2] != b"\r\n" {
                        return Err(BodyError::MalformedChunk);
                    }
                    self.pos += 2;
                    self.state = ChunkState::Size;
                }
                // Trailer section, terminated by an empty line.
                ChunkState::Trailer => {
                    let Some(line_len) = find_crlf(rest) else {
                        return Ok(None);
                    };
                    self.pos += line_len + 2;
                    if line_len == 0 {
                        let body = mem::take(&mut self.body).freeze();
                        return Ok(Some((body, self.pos)));
                    }
                }
            }
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, BodyError> {
    let invalid = || BodyError::InvalidChunkSize(String::from_utf8_lossy(line).into_owned());
    let text = str::from_utf8(line).map_err(|_| invalid())?;
    let size_hex = text.split(';').next().unwrap_or_default().trim();
    usize::from_str_radix(size_hex, 16).map_err(|_| invalid())
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
