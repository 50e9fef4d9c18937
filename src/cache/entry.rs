//! Cached response snapshots.

use std::time::SystemTime;

use bytes::Bytes;

use crate::client::OriginResponse;
use crate::http::{Headers, StatusCode};

/// An origin reply captured in full, as stored in the [`CacheStore`](super::CacheStore).
///
/// The body is a [`Bytes`] handle, so replaying an entry shares the buffer
/// rather than copying it.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    created_at: SystemTime,
}

impl CachedResponse {
    /// Captures a response, stamping it with the current time.
    pub fn new(status: StatusCode, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            created_at: SystemTime::now(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Headers exactly as the origin sent them, repeats and order included.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// When the entry was captured. Recorded for a future expiry policy;
    /// nothing reads it to decide freshness.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }
}

impl From<OriginResponse> for CachedResponse {
    fn from(response: OriginResponse) -> Self {
        Self::new(response.status, response.headers, response.body)
    }
}
