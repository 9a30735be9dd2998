//! In-memory LRU image cache weighted by decoded size.

use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, SharedImage, cost_kb};

/// Fallback host memory budget when none is configured (512 MiB).
pub const DEFAULT_MAX_MEMORY_KB: usize = 512 * 1024;

/// Returns the default memory-tier capacity for a host memory budget.
#[must_use]
pub const fn default_capacity_kb(max_memory_kb: usize) -> usize {
    max_memory_kb / 8
}

struct Entry {
    image: SharedImage,
    cost_kb: usize,
}

struct Inner {
    entries: LruCache<CacheKey, Entry>,
    size_kb: usize,
}

/// In-memory LRU cache for decoded images.
///
/// Capacity is expressed in kilobytes; each entry counts for its decoded
/// byte size divided by 1024. Eviction removes least recently used entries
/// first. Safe to share between tasks; no call ever awaits.
pub struct MemoryImageCache {
    inner: Mutex<Inner>,
    capacity_kb: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache holding at most `capacity_kb` kilobytes.
    #[must_use]
    pub fn new(capacity_kb: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                size_kb: 0,
            }),
            capacity_kb,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache sized to one eighth of [`DEFAULT_MAX_MEMORY_KB`].
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(default_capacity_kb(DEFAULT_MAX_MEMORY_KB))
    }

    /// Returns the cached image and marks it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<SharedImage> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(entry.image.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    /// Peeks at an image without promoting it in the LRU.
    pub fn peek(&self, key: &CacheKey) -> Option<SharedImage> {
        self.inner.lock().entries.peek(key).map(|e| e.image.clone())
    }

    /// Stores an image, evicting least recently used entries to make room.
    ///
    /// An image costing more than the whole capacity is not stored, and any
    /// entry previously held under `key` is dropped. Returns whether the
    /// image was stored.
    pub fn put(&self, key: CacheKey, image: SharedImage) -> bool {
        let cost = cost_kb(&image);
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.pop(&key) {
            inner.size_kb -= old.cost_kb;
        }

        if cost > self.capacity_kb {
            debug!(
                key = %key,
                cost_kb = cost,
                capacity_kb = self.capacity_kb,
                "Image larger than memory cache, not storing"
            );
            return false;
        }

        while inner.size_kb + cost > self.capacity_kb {
            let Some((evicted, entry)) = inner.entries.pop_lru() else {
                break;
            };
            inner.size_kb -= entry.cost_kb;
            trace!(key = %evicted, cost_kb = entry.cost_kb, "Evicted from memory cache");
        }

        debug!(key = %key, cost_kb = cost, "Storing image in memory cache");
        inner.entries.push(key, Entry { image, cost_kb: cost });
        inner.size_kb += cost;
        true
    }

    /// Returns true if `key` is cached, without promoting it.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.contains(key)
    }

    /// Returns the number of cached images.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the summed cost of all entries in kilobytes.
    pub fn size_kb(&self) -> usize {
        self.inner.lock().size_kb
    }

    /// Returns the configured capacity in kilobytes.
    #[must_use]
    pub const fn capacity_kb(&self) -> usize {
        self.capacity_kb
    }

    /// Clears all images from the cache.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.size_kb = 0;
        debug!("Cleared memory image cache");
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let inner = self.inner.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: inner.entries.len(),
            size_kb: inner.size_kb,
            capacity_kb: self.capacity_kb,
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl std::fmt::Debug for MemoryImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImageCache")
            .field("capacity_kb", &self.capacity_kb)
            .finish_non_exhaustive()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Summed cost of cached images in kilobytes.
    pub size_kb: usize,
    /// Configured capacity in kilobytes.
    pub capacity_kb: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images ({}/{} KB), {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.size_kb, self.capacity_kb, self.hit_rate, self.hits, self.misses
        )
    }
}
