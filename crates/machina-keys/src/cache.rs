//! Key cache that answers repeated fetches in-process.
//!
//! Version 1.3 files rotate keys every `metaSize` frames, and every rotation
//! on the decrypt side is a blocking `fetch_key`. Callers that know which keys
//! a file will need can `prewarm` the cache so the stream never stalls on the
//! network mid-way. Entries expire after a TTL.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use machina_core::{Key, KeyAttributes, Metadata};

use crate::{KeyService, KeyServiceError};

/// Thread-safe TTL cache in front of another key service.
pub struct CachingKeyService<S> {
    inner: S,
    entries: Mutex<HashMap<String, (Key, Instant)>>,
    ttl: Duration,
}

impl<S: KeyService> CachingKeyService<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        CachingKeyService {
            inner,
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, (Key, Instant)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed the cache with keys the caller already holds.
    pub fn prewarm(&self, keys: impl IntoIterator<Item = Key>) {
        let now = Instant::now();
        let mut map = self.entries();
        for key in keys {
            map.insert(key.id().to_string(), (key, now));
        }
    }

    /// Fetch `ids` from the inner service now, ahead of the stream that needs them.
    pub fn prefetch(&self, ids: &[&str], metadata: &Metadata) -> Result<(), KeyServiceError> {
        for id in ids {
            if self.cached(id).is_none() {
                let key = self.inner.fetch_key(id, metadata)?;
                self.prewarm([key]);
            }
        }
        Ok(())
    }

    fn cached(&self, id: &str) -> Option<Key> {
        let map = self.entries();
        match map.get(id) {
            Some((key, inserted_at)) if inserted_at.elapsed() < self.ttl => Some(key.clone()),
            _ => None,
        }
    }

    /// Drop a key from the cache.
    pub fn remove(&self, id: &str) {
        self.entries().remove(id);
    }

    /// Evict all entries whose TTL has expired.
    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        self.entries()
            .retain(|_, (_, inserted_at)| inserted_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: KeyService> KeyService for CachingKeyService<S> {
    fn server(&self) -> &str {
        self.inner.server()
    }

    fn create_key(
        &self,
        attributes: &KeyAttributes,
        metadata: &Metadata,
    ) -> Result<Key, KeyServiceError> {
        let key = self.inner.create_key(attributes, metadata)?;
        self.prewarm([key.clone()]);
        Ok(key)
    }

    fn fetch_key(&self, id: &str, metadata: &Metadata) -> Result<Key, KeyServiceError> {
        if let Some(key) = self.cached(id) {
            tracing::trace!(key_id = %id, "key cache hit");
            return Ok(key);
        }
        tracing::debug!(key_id = %id, "key cache miss, fetching");
        let key = self.inner.fetch_key(id, metadata)?;
        self.prewarm([key.clone()]);
        Ok(key)
    }
}
