//! Process-lifetime map from request path to captured response body.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

/// Concurrent path → body store.
///
/// Cloning is cheap and every clone sees the same entries; two stores built with
/// [`CacheStore::new`] share nothing. Entries are never evicted or expired.
///
/// Reads and writes go through a sharded map, so callers never lock anything
/// themselves. Two requests racing on the same path may both [`store`](Self::store);
/// the last one wins.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    entries: Arc<DashMap<String, Bytes>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the body stored for `path`, if any.
    pub fn load(&self, path: &str) -> Option<Bytes> {
        self.entries.get(path).map(|entry| entry.value().clone())
    }

    /// Stores `body` for `path`, replacing any previous entry.
    pub fn store(&self, path: impl Into<String>, body: Bytes) {
        self.entries.insert(path.into(), body);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of cached paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
