//! Outbound HTTP/1.1 responses.
//!
//! A [`Response`] is either built by hand (error replies) or assembled from a
//! stored origin reply. Serialization always regenerates the framing: the
//! stored headers say what the message is, the connection decides how it is
//! delimited.

use bytes::{BufMut, Bytes, BytesMut};

use super::headers::encode_field;
use super::{Headers, StatusCode};

/// A response ready to be written to a client connection.
///
/// ```
/// use cacheproxy::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
        }
    }

    /// A `text/plain` reply, the shape of every error the proxy generates itself.
    pub fn text(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status).body(message)
    }

    /// Appends a header; repeated names accumulate.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.headers.insert(name, value);
    }

    /// Replaces every value of `name`.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.headers.set(name, value);
    }

    /// Text body. Defaults the content type to `text/plain; charset=utf-8`.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        if !self.headers.contains("content-type") {
            self.headers.insert("Content-Type", "text/plain; charset=utf-8");
        }
        self.body = Bytes::from(body.into());
        self
    }

    /// Raw body; headers are left alone. A [`Bytes`] argument is shared, not copied.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Chooses between `Connection: keep-alive` and `Connection: close`.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn content(&self) -> &Bytes {
        &self.body
    }

    /// The length to advertise. An empty body keeps a stored
    /// `Content-Length`, so replies to HEAD and `304 Not Modified` still
    /// describe the representation.
    fn content_length(&self) -> usize {
        if !self.body.is_empty() {
            return self.body.len();
        }
        self.headers
            .get("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Encodes the response for the wire.
    ///
    /// Layout: status line, end-to-end headers in stored order, then
    /// `Connection` and `Content-Length`. Hop-by-hop headers inherited from
    /// another connection are never written.
    pub fn into_bytes(self) -> BytesMut {
        let content_length = self.content_length();
        let connection = if self.keep_alive { "keep-alive" } else { "close" };

        let status_line = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status.as_u16(),
            self.status.canonical_reason()
        );
        let mut buf = BytesMut::with_capacity(256 + self.headers.len() * 32 + self.body.len());
        buf.put(status_line.as_bytes());
        for (name, value) in self.headers.end_to_end() {
            encode_field(&mut buf, name, value);
        }
        buf.put(format!("Connection: {connection}\r\nContent-Length: {content_length}\r\n\r\n").as_bytes());
        buf.put(self.body);
        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}
