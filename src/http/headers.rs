//! Ordered, case-insensitive header fields.
//!
//! An origin's headers are stored and replayed in arrival order, repeated
//! names included (RFC 9110 §5.3), so the map is a plain list of pairs.
//! Values are kept as the raw bytes received: obs-text such as Latin-1 is
//! legal on the wire and must come out exactly as it went in.

use std::fmt;
use std::str;

use bytes::{BufMut, BytesMut};

/// Connection-scoped fields (RFC 9110 §7.6.1) plus the framing fields that
/// are regenerated whenever a message is written to a new connection.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Whether `name` only has meaning on a single connection.
///
/// ```
/// use cacheproxy::http::headers::is_hop_by_hop;
///
/// assert!(is_hop_by_hop("Transfer-Encoding"));
/// assert!(!is_hop_by_hop("Content-Type"));
/// ```
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Writes one `name: value\r\n` line.
pub(crate) fn encode_field(buf: &mut BytesMut, name: &str, value: &[u8]) {
    buf.reserve(name.len() + value.len() + 4);
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value);
    buf.put_slice(b"\r\n");
}

/// Header fields in wire order. Lookups ignore ASCII case.
///
/// The text accessors ([`get`](Self::get), [`get_all`](Self::get_all))
/// skip values that are not UTF-8; [`get_raw`](Self::get_raw) and
/// [`iter`](Self::iter) see every value as bytes.
///
/// ```
/// use cacheproxy::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Set-Cookie", "a=1");
/// headers.insert("X-Cache", "stale");
/// headers.insert("Set-Cookie", "b=2");
/// headers.insert("X-Name", &b"caf\xe9"[..]);
/// headers.set("x-cache", "hit");
///
/// let cookies: Vec<_> = headers.get_all("set-cookie").collect();
/// assert_eq!(cookies, ["a=1", "b=2"]);
/// assert_eq!(headers.get("X-CACHE"), Some("hit"));
/// assert_eq!(headers.get("x-name"), None);
/// assert_eq!(headers.get_raw("x-name"), Some(&b"caf\xe9"[..]));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, Vec<u8>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Appends a field, keeping any existing ones of the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Drops every `name` field, then appends `name: value` at the end.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        let name = name.into();
        self.remove(&name);
        self.fields.push((name, value.into()));
    }

    /// First value of `name` as bytes.
    pub fn get_raw(&self, name: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_slice())
    }

    /// First value of `name`, if it is UTF-8.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_raw(name).and_then(|value| str::from_utf8(value).ok())
    }

    /// Every UTF-8 value of `name`, in wire order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(field, _)| field.eq_ignore_ascii_case(name))
            .filter_map(|(_, value)| str::from_utf8(value).ok())
    }

    /// Drops every `name` field; `true` if there was one.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(field, _)| !field.eq_ignore_ascii_case(name));
        self.fields.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get_raw(name).is_some()
    }

    /// Whether a comma-separated element of any `name` value equals `token`,
    /// ignoring case. `has_token("connection", "close")` and the like.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Number of fields, counting repeats.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Fields that survive forwarding or replay: everything but hop-by-hop
    /// and framing headers.
    pub fn end_to_end(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.iter().filter(|(name, _)| !is_hop_by_hop(name))
    }
}

// Lossy: for logs and debugging only, never for the wire.
impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.iter().try_for_each(|(name, value)| {
            write!(f, "{name}: {}\r\n", String::from_utf8_lossy(value))
        })
    }
}
