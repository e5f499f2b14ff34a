//! Bounded in-memory raster cache, least-recently-used eviction.
//!
//! Purely a latency optimization: correctness never depends on an entry
//! being present. Entries carry the snapshot version they were encoded
//! from; the resolver treats a version mismatch as a miss.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{CacheEntry, Fingerprint};

#[derive(Clone)]
pub struct HotTier {
    entries: Arc<Mutex<LruCache<Fingerprint, CacheEntry>>>,
}

impl HotTier {
    /// New tier bounded to `capacity` entries (floored at 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity floored at 1");
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Look up an entry, refreshing its recency.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.entries.lock().await.get(fingerprint).cloned()
    }

    /// Insert or replace an entry. Replacing refreshes recency without
    /// growing the tier; inserting at capacity evicts the least recently
    /// used entry.
    pub async fn put(&self, fingerprint: Fingerprint, entry: CacheEntry) {
        self.entries.lock().await.put(fingerprint, entry);
    }

    /// Drop every entry. Called after a refresh cycle so stale defaults do
    /// not outlive the regeneration that replaced them on disk.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
