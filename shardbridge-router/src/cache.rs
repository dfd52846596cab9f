//! Bounded routing cache with strict LRU eviction

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use shardbridge_core::{Result, RoutingFact, RoutingResult, ShardBridgeError};

/// Counters of cache effectiveness
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Thread-safe `RoutingFact → RoutingResult` cache.
///
/// A single lock guards the LRU list; it is held only for one lookup or one
/// insertion, never while rules are evaluated.
#[derive(Debug)]
pub struct RoutingCache {
    entries: Mutex<LruCache<RoutingFact, RoutingResult>>,
    capacity: NonZeroUsize,
    stats: CacheStats,
}

impl RoutingCache {
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            ShardBridgeError::config("Routing cache capacity must be greater than 0")
        })?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            stats: CacheStats::default(),
        })
    }

    /// Look up a fact, promoting it to most recently used on a hit
    pub fn get(&self, fact: &RoutingFact) -> Option<RoutingResult> {
        let found = self.entries.lock().get(fact).cloned();
        match found {
            Some(_) => self.stats.hits.fetch_add(1, Ordering::Relaxed),
            None => self.stats.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Store a result, evicting the least recently used entry at capacity
    pub fn put(&self, fact: RoutingFact, result: RoutingResult) {
        let mut entries = self.entries.lock();
        let replacing = entries.contains(&fact);
        let evicted = entries.push(fact, result);
        drop(entries);

        // `push` also hands back the previous value of a replaced key
        if let (false, Some((old_key, _))) = (replacing, evicted) {
            tracing::trace!("Routing cache evicted {}", old_key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
