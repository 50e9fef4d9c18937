//! Origin client: forwards a request to the upstream server and buffers the
//! complete reply.
//!
//! Every forward opens a fresh TCP connection and sends `Connection: close`,
//! so the origin may delimit its body by closing the connection. The reply
//! head is parsed with [`httparse`]; the body is framed by Content-Length,
//! the `chunked` coding, or connection close (see [`BodyLength`]).

use std::io;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::http::{
    BodyError, BodyLength, BodyReader, Headers, Method, Request, StatusCode,
    headers::{encode_field, is_hop_by_hop},
};

/// Errors produced while forwarding a request to the origin.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to origin {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error talking to origin: {0}")]
    Io(#[from] io::Error),

    #[error("malformed origin response: {0}")]
    Parse(#[from] httparse::Error),

    #[error("origin sent invalid status code {0}")]
    InvalidStatus(u16),

    #[error("origin response body: {0}")]
    Body(#[from] BodyError),

    #[error("origin closed the connection without responding")]
    EmptyResponse,

    #[error("origin response exceeds maximum allowed size of {max_bytes} bytes")]
    TooLarge { max_bytes: usize },
}

/// Maximum number of headers accepted on an origin response.
const MAX_HEADERS: usize = 128;

/// Maximum size of a buffered origin response (64 MiB).
const MAX_RESPONSE_SIZE: usize = 64 * 1024 * 1024;

/// Initial read buffer capacity per forward.
const INITIAL_BUF_SIZE: usize = 8192;

/// A fully buffered origin reply.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: StatusCode,
    /// Headers as received, framing headers included.
    pub headers: Headers,
    pub body: Bytes,
}

/// Forwards requests to a single origin given as `host:port`.
///
/// Cheap to clone; clones share the address.
///
/// # Examples
///
/// ```rust,no_run
/// use cacheproxy::client::OriginClient;
/// use cacheproxy::http::Request;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let origin = OriginClient::new("127.0.0.1:9090");
/// let (request, _) = Request::parse(b"GET /health HTTP/1.1\r\nHost: proxy\r\n\r\n")?;
/// let reply = origin.forward(&request).await?;
/// println!("{} ({} bytes)", reply.status, reply.body.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct OriginClient {
    authority: Arc<str>,
}

impl OriginClient {
    pub fn new(authority: impl AsRef<str>) -> Self {
        Self {
            authority: Arc::from(authority.as_ref()),
        }
    }

    /// The `host:port` requests are sent to.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Sends `request` to the origin with the same method, target, headers
    /// and body, and reads the complete reply.
    ///
    /// Nothing is retried. Dropping the returned future aborts the exchange.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Connect`]: the origin is unreachable.
    /// - [`ClientError::Io`]: the connection failed mid-exchange.
    /// - [`ClientError::Parse`], [`ClientError::InvalidStatus`],
    ///   [`ClientError::Body`], [`ClientError::EmptyResponse`],
    ///   [`ClientError::TooLarge`]: the reply could not be read in full.
    pub async fn forward(&self, request: &Request) -> Result<OriginResponse, ClientError> {
        let mut stream = TcpStream::connect(&*self.authority)
            .await
            .map_err(|source| ClientError::Connect {
                addr: self.authority.to_string(),
                source,
            })?;

        let head = self.encode_head(request);
        stream.write_all(&head).await?;
        if !request.body().is_empty() {
            stream.write_all(request.body()).await?;
        }
        stream.flush().await?;

        trace!(
            origin = %self.authority,
            method = %request.method(),
            target = %request.target(),
            "request sent to origin"
        );

        let response = read_response(&mut stream, request.method()).await?;

        debug!(
            origin = %self.authority,
            status = response.status.as_u16(),
            body_len = response.body.len(),
            "origin responded"
        );

        Ok(response)
    }

    /// Serializes the request line and headers.
    ///
    /// `Host` is rewritten to the origin, hop-by-hop headers and `Expect`
    /// are dropped, and framing is re-declared for the already decoded body.
    fn encode_head(&self, request: &Request) -> BytesMut {
        let mut buf = BytesMut::with_capacity(256 + request.headers().len() * 64);

        buf.put(format!("{} {} HTTP/1.1\r\n", request.method(), request.target()).as_bytes());
        buf.put(format!("Host: {}\r\n", self.authority).as_bytes());

        for (name, value) in request.headers().iter() {
            if is_hop_by_hop(name)
                || name.eq_ignore_ascii_case("host")
                || name.eq_ignore_ascii_case("expect")
            {
                continue;
            }
            encode_field(&mut buf, name, value);
        }

        let declares_body = request.headers().contains("content-length")
            || request.headers().contains("transfer-encoding");
        if !request.body().is_empty() || declares_body {
            buf.put(format!("Content-Length: {}\r\n", request.body().len()).as_bytes());
        }

        buf.put(&b"Connection: close\r\n\r\n"[..]);
        buf
    }
}

/// A final response head whose body is still arriving.
struct PendingResponse {
    status: StatusCode,
    headers: Headers,
    body_offset: usize,
    body: BodyReader,
}

enum Head {
    /// More bytes are needed.
    Partial,
    /// A 1xx interim response of this many bytes precedes the real one.
    Interim(usize),
    Final(PendingResponse),
}

/// Assembles the origin's reply from a growing buffer.
///
/// The final head is parsed once; later reads only feed the body reader.
#[derive(Default)]
struct ResponseReader {
    pending: Option<PendingResponse>,
}

impl ResponseReader {
    /// `Ok(None)` means more bytes are needed. Interim responses are
    /// removed from the front of `buf` as they are found.
    fn poll_response(
        &mut self,
        buf: &mut BytesMut,
        method: &Method,
        eof: bool,
    ) -> Result<Option<OriginResponse>, ClientError> {
        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None => loop {
                match parse_head(&buf[..], method)? {
                    Head::Partial => return Ok(None),
                    Head::Interim(len) => buf.advance(len),
                    Head::Final(pending) => break pending,
                }
            },
        };

        match pending.body.take(&buf[pending.body_offset..], eof)? {
            Some((body, _)) => Ok(Some(OriginResponse {
                status: pending.status,
                headers: pending.headers,
                body,
            })),
            None => {
                self.pending = Some(pending);
                Ok(None)
            }
        }
    }
}

/// Reads one complete response, skipping any 1xx interim responses.
async fn read_response<S>(stream: &mut S, method: &Method) -> Result<OriginResponse, ClientError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    let mut reader = ResponseReader::default();
    let mut eof = false;

    loop {
        match reader.poll_response(&mut buf, method, eof)? {
            Some(response) => return Ok(response),
            None if eof => {
                return Err(if buf.is_empty() {
                    ClientError::EmptyResponse
                } else {
                    ClientError::Body(BodyError::Truncated)
                });
            }
            None => {}
        }

        if buf.len() > MAX_RESPONSE_SIZE {
            return Err(ClientError::TooLarge {
                max_bytes: MAX_RESPONSE_SIZE,
            });
        }

        let bytes_read = stream.read_buf(&mut buf).await?;
        eof = bytes_read == 0;
    }
}

fn parse_head(buf: &[u8], method: &Method) -> Result<Head, ClientError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut raw = httparse::Response::new(&mut headers);

    let body_offset = match raw.parse(buf)? {
        httparse::Status::Complete(offset) => offset,
        httparse::Status::Partial => return Ok(Head::Partial),
    };

    let code = raw.code.unwrap_or_default();
    let status = StatusCode::from_u16(code).ok_or(ClientError::InvalidStatus(code))?;

    if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
        return Ok(Head::Interim(body_offset));
    }

    let mut header_map = Headers::with_capacity(raw.headers.len());
    for header in raw.headers.iter() {
        header_map.insert(header.name, header.value);
    }

    let framing = BodyLength::for_response(method, status, &header_map)?;
    Ok(Head::Final(PendingResponse {
        status,
        headers: header_map,
        body_offset,
        body: BodyReader::new(framing),
    }))
}
