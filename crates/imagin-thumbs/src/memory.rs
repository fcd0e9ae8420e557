//! Thread-safe LRU cache of decoded thumbnails
//!
//! Entries are bounded by count rather than bytes: thumbnails are all capped at the
//! same edge length, so the count is a good proxy for memory. Reads take the shared
//! lock and refresh recency through an atomic access clock; inserts, evictions and
//! clears take the exclusive lock.

use crate::{CacheKey, Thumbnail};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Default number of thumbnails kept in memory
pub const DEFAULT_CAPACITY: usize = 200;

/// A cached thumbnail plus its last-access tick
struct CacheEntry {
    image: Thumbnail,
    last_accessed: AtomicU64,
}

/// Counted LRU cache keyed by [`CacheKey`]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    capacity: usize,
    access_clock: AtomicU64,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
            access_clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get a thumbnail, marking it most recently used
    pub fn get(&self, key: &CacheKey) -> Option<Thumbnail> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        entry.last_accessed.store(self.tick(), Ordering::Relaxed);
        trace!(key = %key, "Memory cache hit");
        Some(entry.image.clone())
    }

    /// Get a thumbnail without touching its recency
    pub fn peek(&self, key: &CacheKey) -> Option<Thumbnail> {
        self.entries.read().get(key).map(|entry| entry.image.clone())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Insert or overwrite a thumbnail, then evict down to capacity
    pub fn put(&self, key: CacheKey, image: Thumbnail) {
        let mut entries = self.entries.write();
        let entry = CacheEntry {
            image,
            last_accessed: AtomicU64::new(self.tick()),
        };
        entries.insert(key, entry);

        while entries.len() > self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed.load(Ordering::Relaxed))
                .map(|(key, _)| key.clone());

            match oldest {
                Some(key) => {
                    entries.remove(&key);
                    trace!(key = %key, "Evicted from memory cache");
                }
                None => break,
            }
        }
    }

    pub fn remove(&self, key: &CacheKey) -> Option<Thumbnail> {
        self.entries.write().remove(key).map(|entry| entry.image)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
