//! Cache key derivation.

use std::borrow::Borrow;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::http::{Method, Request};

/// Identity of a cacheable request: the SHA-256 digest of its method,
/// request-target (query string included) and body, as 64 lowercase hex
/// characters.
///
/// # Examples
///
/// ```
/// use cacheproxy::cache::CacheKey;
/// use cacheproxy::http::Method;
///
/// let a = CacheKey::derive(&Method::Get, "/a", b"");
/// let b = CacheKey::derive(&Method::Get, "/b", b"");
/// assert_ne!(a, b);
/// assert_eq!(a, CacheKey::derive(&Method::Get, "/a", b""));
/// assert_eq!(a.as_str().len(), CacheKey::LEN);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Length of every key in hex characters.
    pub const LEN: usize = 64;

    /// Derives the key for `(method, target, body)`.
    ///
    /// Each part is length-prefixed before hashing so that bytes moving
    /// between parts (e.g. a `:` in the target versus in the body) can never
    /// produce the same digest input.
    pub fn derive(method: &Method, target: &str, body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        for part in [method.as_str().as_bytes(), target.as_bytes(), body] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Derives the key for a fully received request.
    pub fn for_request(request: &Request) -> Self {
        Self::derive(request.method(), request.target(), request.body())
    }

    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets the store be queried with a plain `&str`, e.g. a key read back from
// an `X-Cache-Key` response header.
impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
