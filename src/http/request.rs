//! Inbound request heads, parsed with [`httparse`].

use bytes::Bytes;
use thiserror::Error;

use super::{BodyError, Headers, Method};

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("bad request body: {0}")]
    Body(#[from] BodyError),
}

/// A client request.
///
/// [`Request::parse`] only reads the request line and headers. The server
/// attaches the body with [`Request::with_body`] once all of it has
/// arrived, which is what makes the body usable as part of a cache key.
///
/// ```
/// use cacheproxy::http::request::Request;
///
/// let raw = b"GET /items?page=2 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, body_offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.target(), "/items?page=2");
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// assert_eq!(body_offset, raw.len());
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    /// Request-target exactly as received, query included.
    target: String,
    /// Minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    minor_version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parses a request head from the front of `buf`.
    ///
    /// Returns the request, with an empty body, and the offset in `buf`
    /// just past the blank line ending the head. Header values are kept as
    /// received, bytes outside UTF-8 included.
    ///
    /// # Errors
    ///
    /// [`RequestError::Incomplete`] until the blank line has arrived;
    /// [`RequestError::Parse`] or [`RequestError::MissingField`] for a
    /// head that can never become valid.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut slots = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut head = httparse::Request::new(&mut slots);

        let httparse::Status::Complete(body_offset) = head.parse(buf)? else {
            return Err(RequestError::Incomplete);
        };

        let method: Method = head
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
            .unwrap_or_else(|never| match never {});
        let target = head.path.ok_or(RequestError::MissingField { field: "path" })?;
        let minor_version = head.version.ok_or(RequestError::MissingField { field: "version" })?;

        let mut headers = Headers::with_capacity(head.headers.len());
        for field in head.headers.iter() {
            headers.insert(field.name, field.value);
        }

        let request = Self {
            method,
            target: target.to_owned(),
            minor_version,
            headers,
            body: Bytes::new(),
        };
        Ok((request, body_offset))
    }

    /// Attaches the fully received body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path plus `?query`, as sent by the client.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether the client connection stays open after the reply.
    ///
    /// `Connection: close` always wins; otherwise HTTP/1.1 stays open and
    /// HTTP/1.0 needs an explicit `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        if self.headers.has_token("connection", "close") {
            return false;
        }
        self.minor_version == 1 || self.headers.has_token("connection", "keep-alive")
    }

    /// Whether the client waits for `100 Continue` before sending its body.
    pub fn expects_continue(&self) -> bool {
        self.headers
            .get("expect")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
    }
}
