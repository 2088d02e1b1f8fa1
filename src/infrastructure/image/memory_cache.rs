//! In-memory, cost-bounded LRU image cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::DynamicImage;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

/// Default total cost budget (50 MiB of encoded bytes).
pub const DEFAULT_COST_LIMIT: usize = 50 * 1024 * 1024;

/// Default maximum number of images kept in memory.
pub const DEFAULT_COUNT_LIMIT: usize = 100;

struct MemoryEntry {
    image: Arc<DynamicImage>,
    cost: usize,
}

struct Inner {
    entries: LruCache<String, MemoryEntry>,
    total_cost: usize,
}

/// In-memory cache for decoded images, keyed by URL.
///
/// Every entry carries a cost (the byte length of the payload it was decoded
/// from). Least recently used entries are evicted once either the total cost
/// or the entry count goes over its limit. A limit of zero disables that
/// bound. Callers hold images through `Arc`, so eviction never invalidates an
/// image that is already in use.
pub struct MemoryImageCache {
    inner: Mutex<Inner>,
    cost_limit: usize,
    count_limit: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache with the given cost and count limits.
    #[must_use]
    pub fn new(cost_limit: usize, count_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_cost: 0,
            }),
            cost_limit,
            count_limit,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a new cache with the default limits.
    #[must_use]
    pub fn with_default_limits() -> Self {
        Self::new(DEFAULT_COST_LIMIT, DEFAULT_COUNT_LIMIT)
    }

    /// Looks up `url`, promoting it in the LRU order.
    pub fn get(&self, url: &str) -> Option<Arc<DynamicImage>> {
        self.get_entry(url).map(|(image, _)| image)
    }

    /// Looks up `url` and returns the image with its cost.
    pub fn get_entry(&self, url: &str) -> Option<(Arc<DynamicImage>, usize)> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(url) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(url = %url, "Memory cache hit");
            Some((entry.image.clone(), entry.cost))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(url = %url, "Memory cache miss");
            None
        }
    }

    /// Peeks at an image without promoting it or touching statistics.
    pub fn peek(&self, url: &str) -> Option<Arc<DynamicImage>> {
        self.inner
            .lock()
            .entries
            .peek(url)
            .map(|entry| entry.image.clone())
    }

    /// Returns true if `url` is cached.
    pub fn contains(&self, url: &str) -> bool {
        self.inner.lock().entries.contains(url)
    }

    /// Stores an image under `url` with the given cost.
    ///
    /// Returns false if the image was not retained because its cost alone
    /// exceeds the cost limit.
    pub fn put(&self, url: &str, image: Arc<DynamicImage>, cost: usize) -> bool {
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.pop(url) {
            inner.total_cost -= old.cost;
        }

        if self.cost_limit > 0 && cost > self.cost_limit {
            debug!(
                url = %url,
                cost = cost,
                cost_limit = self.cost_limit,
                "Image exceeds memory cost limit, not cached"
            );
            return false;
        }

        inner.entries.put(url.to_string(), MemoryEntry { image, cost });
        inner.total_cost += cost;
        debug!(url = %url, cost = cost, "Stored image in memory cache");

        while self.over_limits(&inner) {
            let Some((evicted, entry)) = inner.entries.pop_lru() else {
                break;
            };
            inner.total_cost -= entry.cost;
            debug!(url = %evicted, cost = entry.cost, "Evicted image from memory cache");
        }

        true
    }

    /// Removes `url` from the cache.
    pub fn remove(&self, url: &str) -> bool {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.pop(url) {
            inner.total_cost -= entry.cost;
            debug!(url = %url, "Removed image from memory cache");
            true
        } else {
            false
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_cost = 0;
        debug!("Cleared memory image cache");
    }

    /// Returns the number of cached images.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the summed cost of all cached images.
    pub fn total_cost(&self) -> usize {
        self.inner.lock().total_cost
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
            total_cost: inner.total_cost,
        }
    }

    fn over_limits(&self, inner: &Inner) -> bool {
        (self.cost_limit > 0 && inner.total_cost > self.cost_limit)
            || (self.count_limit > 0 && inner.entries.len() > self.count_limit)
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_limits()
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
    /// Summed cost of cached images, in bytes.
    pub total_cost: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images ({} bytes), {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.total_cost, self.hit_rate, self.hits, self.misses
        )
    }
}
