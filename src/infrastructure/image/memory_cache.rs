//! In-memory bitmap cache bounded by item count and total cost.

use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{Bitmap, CacheKey};

/// Default maximum number of bitmaps held in memory.
pub const DEFAULT_MAX_ITEMS: usize = 100;

/// Default cost ceiling in bytes (150 MB).
pub const DEFAULT_MAX_COST: u64 = 150 * 1024 * 1024;

struct Entry {
    image: Bitmap,
    cost: u64,
}

struct Store {
    entries: LruCache<CacheKey, Entry>,
    total_cost: u64,
}

/// In-memory cache for decoded bitmaps.
///
/// Evicts least recently used entries until both the item limit and the
/// cost limit hold. Thread-safe; every call returns with the total cost at
/// or below the ceiling.
pub struct MemoryCache {
    store: Mutex<Store>,
    max_items: usize,
    max_cost: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Creates a cache with the given item and cost ceilings.
    #[must_use]
    pub fn new(max_items: usize, max_cost: u64) -> Self {
        Self {
            store: Mutex::new(Store {
                entries: LruCache::unbounded(),
                total_cost: 0,
            }),
            max_items,
            max_cost,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache with the default ceilings.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_ITEMS, DEFAULT_MAX_COST)
    }

    /// Returns the bitmap for `key`, marking it recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Bitmap> {
        let mut store = self.store.lock();
        if let Some(entry) = store.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(entry.image.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    /// Returns the bitmap for `key` without touching recency or stats.
    pub fn peek(&self, key: &CacheKey) -> Option<Bitmap> {
        self.store.lock().entries.peek(key).map(|e| e.image.clone())
    }

    /// Returns true if `key` is cached.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.store.lock().entries.contains(key)
    }

    /// Stores a bitmap with the given cost, evicting as needed.
    ///
    /// An entry whose own cost exceeds the ceiling is not stored, and any
    /// previous entry under the same key is dropped.
    pub fn set(&self, key: CacheKey, image: Bitmap, cost: u64) {
        let mut store = self.store.lock();

        if cost > self.max_cost {
            if let Some(old) = store.entries.pop(&key) {
                store.total_cost -= old.cost;
            }
            debug!(key = %key, cost, max_cost = self.max_cost, "Bitmap exceeds memory cache ceiling, not cached");
            return;
        }

        if let Some(old) = store.entries.put(key, Entry { image, cost }) {
            store.total_cost -= old.cost;
        }
        store.total_cost += cost;

        let mut evicted = 0usize;
        while store.entries.len() > self.max_items || store.total_cost > self.max_cost {
            let Some((_, entry)) = store.entries.pop_lru() else {
                break;
            };
            store.total_cost -= entry.cost;
            evicted += 1;
        }

        if evicted > 0 {
            debug!(
                evicted,
                items = store.entries.len(),
                total_cost = store.total_cost,
                "Evicted bitmaps from memory cache"
            );
        }
    }

    /// Removes the bitmap for `key`.
    pub fn remove(&self, key: &CacheKey) {
        let mut store = self.store.lock();
        if let Some(entry) = store.entries.pop(key) {
            store.total_cost -= entry.cost;
            debug!(key = %key, "Removed bitmap from memory cache");
        }
    }

    /// Drops every cached bitmap. Wired to the host's low-memory signal.
    pub fn clear(&self) {
        let mut store = self.store.lock();
        store.entries.clear();
        store.total_cost = 0;
        debug!("Cleared memory cache");
    }

    /// Number of cached bitmaps.
    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the costs of all cached bitmaps.
    pub fn total_cost(&self) -> u64 {
        self.store.lock().total_cost
    }

    /// Configured cost ceiling.
    #[must_use]
    pub const fn max_cost(&self) -> u64 {
        self.max_cost
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
        let store = self.store.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: store.entries.len(),
            total_cost: store.total_cost,
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_defaults()
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
    /// Current number of cached bitmaps.
    pub size: usize,
    /// Current total cost in bytes.
    pub total_cost: u64,
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bitmap(size: u32) -> Bitmap {
        Arc::new(image::DynamicImage::new_rgba8(size, size))
    }

    #[test]
    fn test_set_and_get() {
        let cache = MemoryCache::new(10, 1_000_000);
        let key = CacheKey::from("test1");

        cache.set(key.clone(), bitmap(100), 40_000);
        let retrieved = cache.get(&key);

        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().width(), 100);
        assert_eq!(cache.total_cost(), 40_000);
    }

    #[test]
    fn test_miss() {
        let cache = MemoryCache::new(10, 1_000);
        assert!(cache.get(&CacheKey::from("nonexistent")).is_none());
    }

    #[test]
    fn test_item_limit_evicts_lru() {
        let cache = MemoryCache::new(2, 1_000);
        let (k1, k2, k3) = (CacheKey::from("1"), CacheKey::from("2"), CacheKey::from("3"));

        cache.set(k1.clone(), bitmap(1), 1);
        cache.set(k2.clone(), bitmap(1), 1);
        cache.set(k3.clone(), bitmap(1), 1);

        assert!(cache.get(&k1).is_none());
        assert!(cache.get(&k2).is_some());
        assert!(cache.get(&k3).is_some());
    }

    #[test]
    fn test_cost_ceiling_holds_after_every_set() {
        let cache = MemoryCache::new(100, 100);

        for i in 0..50u64 {
            cache.set(CacheKey::from(format!("k{i}").as_str()), bitmap(1), 10 + i % 7);
            assert!(cache.total_cost() <= 100);
        }
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_recently_used_survives_cost_eviction() {
        let cache = MemoryCache::new(10, 30);
        let (k1, k2, k3) = (CacheKey::from("1"), CacheKey::from("2"), CacheKey::from("3"));

        cache.set(k1.clone(), bitmap(1), 10);
        cache.set(k2.clone(), bitmap(1), 10);
        cache.set(k3.clone(), bitmap(1), 10);
        let _ = cache.get(&k1);

        cache.set(CacheKey::from("4"), bitmap(1), 10);

        assert!(cache.contains(&k1));
        assert!(!cache.contains(&k2));
        assert_eq!(cache.total_cost(), 30);
    }

    #[test]
    fn test_oversized_entry_not_stored() {
        let cache = MemoryCache::new(10, 100);
        let key = CacheKey::from("big");

        cache.set(key.clone(), bitmap(1), 50);
        cache.set(key.clone(), bitmap(2), 500);

        assert!(!cache.contains(&key));
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_replace_updates_cost() {
        let cache = MemoryCache::new(10, 100);
        let key = CacheKey::from("k");

        cache.set(key.clone(), bitmap(1), 40);
        cache.set(key.clone(), bitmap(1), 25);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 25);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = MemoryCache::new(10, 100);
        cache.set(CacheKey::from("a"), bitmap(1), 10);
        cache.set(CacheKey::from("b"), bitmap(1), 20);

        cache.remove(&CacheKey::from("a"));
        assert_eq!(cache.total_cost(), 20);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_stats() {
        let cache = MemoryCache::new(10, 100);
        let key = CacheKey::from("test1");
        cache.set(key.clone(), bitmap(1), 4);

        let _ = cache.get(&key);
        let _ = cache.get(&CacheKey::from("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.total_cost, 4);
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache = MemoryCache::new(2, 100);
        let (k1, k2) = (CacheKey::from("1"), CacheKey::from("2"));

        cache.set(k1.clone(), bitmap(1), 1);
        cache.set(k2.clone(), bitmap(1), 1);
        let _ = cache.peek(&k1);
        cache.set(CacheKey::from("3"), bitmap(1), 1);

        assert!(cache.peek(&k1).is_none());
    }

    #[test]
    fn test_concurrent_writers_respect_ceiling() {
        let cache = Arc::new(MemoryCache::new(1_000, 500));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = CacheKey::from(format!("{t}-{i}").as_str());
                        cache.set(key.clone(), bitmap(1), 7);
                        let _ = cache.get(&key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.total_cost() <= 500);
    }
}
