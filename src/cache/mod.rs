//! In-memory response cache.
//!
//! [`CacheStore`] maps a [`CacheKey`] to a [`CachedResponse`] behind a single
//! mutex. The lock is taken for exactly one map operation at a time and is
//! never held across I/O, so hold time does not depend on body size: entries
//! are moved in and handed out as [`Arc`]s.
//!
//! There is no eviction. Entries live until [`CacheStore::flush`],
//! [`CacheStore::invalidate`], or an overwrite by a newer [`CacheStore::put`].

mod entry;
mod key;

pub use entry::CachedResponse;
pub use key::CacheKey;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

/// Shared map from cache key to response snapshot.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use bytes::Bytes;
/// use cacheproxy::cache::{CacheKey, CacheStore, CachedResponse};
/// use cacheproxy::http::{Headers, Method, StatusCode};
///
/// let store = CacheStore::new();
/// let key = CacheKey::derive(&Method::Get, "/a", b"");
/// let entry = CachedResponse::new(StatusCode::OK, Headers::new(), Bytes::from_static(b"hi"));
///
/// store.put(key.clone(), Arc::new(entry));
/// assert_eq!(&store.get(key.as_str()).unwrap().body()[..], b"hi");
///
/// assert!(store.invalidate(key.as_str()));
/// assert!(store.get(key.as_str()).is_none());
/// ```
#[derive(Debug, Default)]
pub struct CacheStore {
    entries: Mutex<HashMap<CacheKey, Arc<CachedResponse>>>,
}

impl CacheStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // Entries go in whole, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<CachedResponse>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current snapshot for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Arc<CachedResponse>> {
        self.lock().get(key).cloned()
    }

    /// Inserts or unconditionally overwrites the entry for `key`.
    pub fn put(&self, key: CacheKey, response: Arc<CachedResponse>) {
        let previous = self.lock().insert(key, response);
        if previous.is_some() {
            trace!("cache entry overwritten");
        }
    }

    /// Removes the entry for `key`. Returns `true` if one was present.
    ///
    /// The key becomes absent; no placeholder is left behind that a later
    /// lookup could mistake for a hit.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.lock().remove(key);
        removed.is_some()
    }

    /// Removes every entry and returns how many there were.
    ///
    /// The map is swapped out under the lock and dropped after it is
    /// released.
    pub fn flush(&self) -> usize {
        let old = std::mem::take(&mut *self.lock());
        trace!(entries = old.len(), "store emptied");
        old.len()
    }

    /// Returns `true` if an entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
