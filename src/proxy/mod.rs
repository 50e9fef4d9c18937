//! Caching reverse proxy handler.
//!
//! [`CachingProxy::handle`] implements the per-request lifecycle:
//!
//! 1. Non-GET requests are forwarded unconditionally and never cached.
//! 2. A GET request is reduced to a [`CacheKey`] over its method, target and
//!    fully received body.
//! 3. On a hit the stored status, headers and body are replayed without
//!    contacting the origin.
//! 4. On a miss the request is forwarded; the complete reply is stored
//!    before the client sees it, so any lookup that starts afterwards hits.
//!
//! Every reply carries `X-Cache: hit|miss`, and replies that went through
//! key derivation also carry `X-Cache-Key`. Upstream values for either
//! header are discarded.
//!
//! Concurrent misses for the same key are not coalesced: each one contacts
//! the origin and the last store wins.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheStore, CachedResponse};
use crate::client::{ClientError, OriginClient};
use crate::http::{Headers, Request, Response, StatusCode};

/// Response header reporting the cache decision.
pub const CACHE_STATUS_HEADER: &str = "X-Cache";

/// Response header reporting the key a GET request resolved to.
pub const CACHE_KEY_HEADER: &str = "X-Cache-Key";

/// Outcome of the cache lookup for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reverse proxy in front of one origin, with its own [`CacheStore`].
///
/// Clones share the store, so one clone per connection task all see the
/// same cache.
///
/// # Examples
///
/// ```rust,no_run
/// use cacheproxy::client::OriginClient;
/// use cacheproxy::proxy::CachingProxy;
/// use cacheproxy::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let proxy = CachingProxy::new(OriginClient::new("127.0.0.1:9090"));
///     proxy.flush_cache();
///
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server
///         .run(move |request| {
///             let proxy = proxy.clone();
///             async move { proxy.handle(request).await }
///         })
///         .await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CachingProxy {
    origin: OriginClient,
    store: Arc<CacheStore>,
}

impl CachingProxy {
    /// Creates a proxy with an empty store of its own.
    pub fn new(origin: OriginClient) -> Self {
        Self::with_store(origin, Arc::new(CacheStore::new()))
    }

    /// Creates a proxy over an existing store.
    pub fn with_store(origin: OriginClient, store: Arc<CacheStore>) -> Self {
        Self { origin, store }
    }

    pub fn origin(&self) -> &OriginClient {
        &self.origin
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Empties the cache.
    pub fn flush_cache(&self) {
        let removed = self.store.flush();
        info!(removed, "cache flushed");
    }

    /// Removes the entry for `key`, so its next lookup misses. Other keys are
    /// unaffected. Returns `true` if an entry was removed.
    pub fn clean_cache(&self, key: &str) -> bool {
        let removed = self.store.invalidate(key);
        info!(key, removed, "cache entry invalidated");
        removed
    }

    /// Serves one request, from the cache when possible.
    pub async fn handle(&self, request: Request) -> Response {
        if !request.method().is_cacheable() {
            return self.bypass(&request).await;
        }

        let key = CacheKey::for_request(&request);

        if let Some(cached) = self.store.get(key.as_str()) {
            debug!(%key, target = %request.target(), "cache hit");
            return relay(&cached, CacheStatus::Hit, Some(&key));
        }

        debug!(%key, target = %request.target(), "cache miss, forwarding to origin");
        match self.origin.forward(&request).await {
            Ok(reply) => {
                let cached = Arc::new(CachedResponse::from(reply));
                self.store.put(key.clone(), Arc::clone(&cached));
                relay(&cached, CacheStatus::Miss, Some(&key))
            }
            Err(e) => forwarding_failed(&request, &e),
        }
    }

    /// Forwards a request that must not be served from or stored in the cache.
    async fn bypass(&self, request: &Request) -> Response {
        debug!(method = %request.method(), target = %request.target(), "uncacheable method, forwarding");
        match self.origin.forward(request).await {
            Ok(reply) => relay(
                &CachedResponse::from(reply),
                CacheStatus::Miss,
                None,
            ),
            Err(e) => forwarding_failed(request, &e),
        }
    }
}

/// Builds the client response: every upstream header in order, then the
/// cache headers, which no upstream value may override.
fn relay(snapshot: &CachedResponse, status: CacheStatus, key: Option<&CacheKey>) -> Response {
    let mut response = Response::new(snapshot.status());
    copy_upstream_headers(snapshot.headers(), &mut response);
    response.set_header(CACHE_STATUS_HEADER, status.as_str());
    if let Some(key) = key {
        response.set_header(CACHE_KEY_HEADER, key.as_str());
    }
    response.body_bytes(snapshot.body().clone())
}

fn copy_upstream_headers(upstream: &Headers, response: &mut Response) {
    for (name, value) in upstream.iter() {
        if name.eq_ignore_ascii_case(CACHE_STATUS_HEADER) || name.eq_ignore_ascii_case(CACHE_KEY_HEADER) {
            continue;
        }
        response.add_header(name, value);
    }
}

fn forwarding_failed(request: &Request, error: &ClientError) -> Response {
    warn!(
        method = %request.method(),
        target = %request.target(),
        error = %error,
        "error forwarding request"
    );
    Response::text(StatusCode::BAD_GATEWAY, format!("Error forwarding request: {error}"))
        .header(CACHE_STATUS_HEADER, CacheStatus::Miss.as_str())
}
