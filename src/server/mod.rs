//! Inbound side of the proxy: a Tokio accept loop speaking HTTP/1.1.
//!
//! Each connection runs in its own task and stays open across requests
//! (keep-alive, pipelining). A handler only ever sees a request whose body
//! has arrived in full, whether framed by Content-Length or chunked.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    BodyLength, BodyReader, StatusCode,
    request::{Request, RequestError},
    response::Response,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Requests larger than this, head and body together, get a 413 (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

const CONTINUE_LINE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// A bound listener waiting for a handler.
///
/// ```rust,no_run
/// use cacheproxy::server::Server;
/// use cacheproxy::http::{Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:9090").await?;
///     server.run(|req| async move {
///         Response::text(StatusCode::OK, format!("origin saw {}", req.target()))
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds to `addr`. Port `0` picks an ephemeral port; see [`Server::local_addr`].
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address is unusable or taken.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
            addr: addr.to_owned(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        Ok(Self { listener, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves connections until the future is dropped.
    ///
    /// `handler` is shared by every connection task. A failed `accept` is
    /// logged and the loop carries on.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "listening");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(%peer, "connection accepted");
            let connection = Connection::new(stream, peer);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = connection.serve(&*handler).await {
                    warn!(%peer, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// A request whose head is parsed and whose body is still arriving.
struct PendingRequest {
    request: Request,
    body_offset: usize,
    body: BodyReader,
}

/// Cuts complete requests off the front of a connection's input buffer.
///
/// The head of a request is parsed once; while its body arrives only the
/// body reader runs again.
#[derive(Default)]
struct RequestReader {
    pending: Option<PendingRequest>,
}

impl RequestReader {
    /// Removes the next complete request, head and body, from `buf`.
    ///
    /// `Ok(None)` means more bytes are needed.
    fn poll_request(&mut self, buf: &mut BytesMut, eof: bool) -> Result<Option<Request>, RequestError> {
        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None => {
                let (request, body_offset) = match Request::parse(&buf[..]) {
                    Ok(parsed) => parsed,
                    Err(RequestError::Incomplete) => return Ok(None),
                    Err(e) => return Err(e),
                };
                let body = BodyReader::new(BodyLength::for_request(request.headers())?);
                PendingRequest { request, body_offset, body }
            }
        };

        match pending.body.take(&buf[pending.body_offset..], eof)? {
            Some((body, used)) => {
                buf.advance(pending.body_offset + used);
                Ok(Some(pending.request.with_body(body)))
            }
            None => {
                self.pending = Some(pending);
                Ok(None)
            }
        }
    }

    /// The parsed head still waiting for its body.
    fn awaiting_body(&self) -> Option<&Request> {
        self.pending.as_ref().map(|pending| &pending.request)
    }
}

/// One client connection and its unconsumed input.
struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buf: BytesMut,
    reader: RequestReader,
    eof: bool,
    continue_sent: bool,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            buf: BytesMut::with_capacity(INITIAL_BUF_SIZE),
            reader: RequestReader::default(),
            eof: false,
            continue_sent: false,
        }
    }

    /// Serves every buffered request before reading again, until either
    /// side asks to close.
    async fn serve<H, F>(mut self, handler: &H) -> std::io::Result<()>
    where
        H: Fn(Request) -> F,
        F: Future<Output = Response>,
    {
        loop {
            let request = match self.reader.poll_request(&mut self.buf, self.eof) {
                Ok(Some(request)) => {
                    self.continue_sent = false;
                    request
                }
                Ok(None) if self.eof => {
                    debug!(peer = %self.peer, unparsed = self.buf.len(), "connection closed by peer");
                    return Ok(());
                }
                Ok(None) if self.buf.len() > MAX_REQUEST_SIZE => {
                    warn!(peer = %self.peer, "request too large, sending 413");
                    return self
                        .reject(Response::text(StatusCode::PAYLOAD_TOO_LARGE, "Request entity too large"))
                        .await;
                }
                Ok(None) => {
                    self.fill().await?;
                    continue;
                }
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "bad request, sending 400");
                    return self
                        .reject(Response::text(StatusCode::BAD_REQUEST, format!("Bad Request: {e}")))
                        .await;
                }
            };

            let keep_alive = request.is_keep_alive() && !self.eof;
            debug!(
                peer = %self.peer,
                method = %request.method(),
                target = %request.target(),
                body_len = request.body().len(),
                "dispatching request"
            );

            let response = handler(request).await.keep_alive(keep_alive);
            self.stream.write_all(&response.into_bytes()).await?;
            self.stream.flush().await?;

            if !keep_alive {
                debug!(peer = %self.peer, "closing after response");
                return Ok(());
            }
        }
    }

    /// Reads more input, first sending `100 Continue` if a complete head
    /// asked for it.
    async fn fill(&mut self) -> std::io::Result<()> {
        if !self.continue_sent && self.reader.awaiting_body().is_some_and(Request::expects_continue) {
            self.stream.write_all(CONTINUE_LINE).await?;
            self.continue_sent = true;
        }

        let read = self.stream.read_buf(&mut self.buf).await?;
        self.eof = read == 0;
        Ok(())
    }

    async fn reject(mut self, response: Response) -> std::io::Result<()> {
        self.stream.write_all(&response.keep_alive(false).into_bytes()).await?;
        self.stream.flush().await
    }
}
