//! TTL + LRU cache
//!
//! Size-bounded key/value store with per-entry time-to-live. Expiry is lazy
//! (checked on read); when a new key arrives at capacity, expired entries are
//! purged first and the least-recently-accessed entry is evicted only if the
//! cache is still full.

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use crate::{ResilienceError, ResilienceResult};

/// A cached value with its insertion time and lifetime
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Cached value
    pub value: V,
    /// Insertion instant
    pub created_at: Instant,
    /// Lifetime; `Duration::ZERO` never expires
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Create an entry stamped with the current instant
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }

    /// Whether the entry outlived its TTL
    pub fn is_expired(&self) -> bool {
        !self.ttl.is_zero() && self.created_at.elapsed() > self.ttl
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    /// Live entries (expired entries not yet purged included)
    pub size: usize,
    /// Maximum entries
    pub capacity: usize,
    /// Successful reads
    pub hits: u64,
    /// Absent or expired reads
    pub misses: u64,
    /// Entries dropped to make room (expired purges excluded)
    pub evictions: u64,
    /// hits / (hits + misses), 0.0 before the first read
    pub hit_rate: f64,
}

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn purge_expired(&mut self) -> usize {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }
}

/// Thread-safe TTL cache with LRU eviction
///
/// All operations take one coarse mutex. The cache is auxiliary, never on a
/// path hot enough to need sharding.
pub struct TtlCache<K: Hash + Eq, V> {
    name: String,
    default_ttl: Duration,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries
    pub fn new(name: impl Into<String>, capacity: usize, default_ttl: Duration) -> ResilienceResult<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or(ResilienceError::ZeroCapacity)?;

        Ok(Self {
            name: name.into(),
            default_ttl,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        })
    }

    /// Cache name, used in log lines
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default TTL applied by [`TtlCache::insert`]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Insert with the cache's default TTL
    pub fn insert(&self, key: K, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL (`Duration::ZERO` never expires)
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let mut inner = self.inner.lock();

        if !inner.entries.contains(&key) && inner.entries.len() >= inner.entries.cap().get() {
            let purged = inner.purge_expired();
            if purged > 0 {
                tracing::trace!(cache = %self.name, purged, "purged expired entries");
            }

            if inner.entries.len() >= inner.entries.cap().get() && inner.entries.pop_lru().is_some() {
                inner.evictions += 1;
            }
        }

        inner.entries.put(key, CacheEntry::new(value, ttl));
    }

    /// Read a value, dropping it if expired
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();

        let expired = inner.entries.peek(key).map(|entry| entry.is_expired());

        let Some(expired) = expired else {
            inner.misses += 1;
            return None;
        };

        if expired {
            inner.entries.pop(key);
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Whether a live entry exists (does not touch recency or counters)
    pub fn contains(&self, key: &K) -> bool {
        self.inner
            .lock()
            .entries
            .peek(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Remove an entry, returning its value if it was still live
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner
            .lock()
            .entries
            .pop(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value)
    }

    /// Drop every entry and reset counters
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
    }

    /// Eagerly drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.inner.lock().purge_expired()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Statistics snapshot
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;

        CacheStats {
            size: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> TtlCache<String, u32> {
        TtlCache::new("test", capacity, Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn test_get_after_set() {
        let cache = cache(4);
        cache.set("a".into(), 1, Duration::from_secs(1));
        assert_eq!(cache.get(&"a".into()), Some(1));
    }

    #[test]
    fn test_entry_expires() {
        let cache = cache(4);
        cache.set("a".into(), 1, Duration::from_secs(1));
        std::thread::sleep(Duration::from_millis(1100));

        assert_eq!(cache.get(&"a".into()), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let mut entry = CacheEntry::new(7u32, Duration::ZERO);
        entry.created_at = Instant::now() - Duration::from_secs(2);
        assert!(!entry.is_expired());

        let mut short = CacheEntry::new(7u32, Duration::from_secs(1));
        short.created_at = Instant::now() - Duration::from_secs(2);
        assert!(short.is_expired());
    }

    #[test]
    fn test_evicts_least_recently_accessed() {
        let cache = cache(3);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        cache.insert("c".into(), 3);

        // "a" becomes most recent, so "b" is now the LRU entry
        assert_eq!(cache.get(&"a".into()), Some(1));
        cache.insert("d".into(), 4);

        assert_eq!(cache.get(&"b".into()), None);
        assert_eq!(cache.get(&"a".into()), Some(1));
        assert_eq!(cache.get(&"c".into()), Some(3));
        assert_eq!(cache.get(&"d".into()), Some(4));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_expired_purged_before_lru_eviction() {
        let cache = cache(2);
        cache.set("old".into(), 1, Duration::ZERO);
        cache.set("short".into(), 2, Duration::from_millis(30));
        std::thread::sleep(Duration::from_millis(60));

        cache.insert("new".into(), 3);

        // "old" is the LRU entry but survives because "short" had expired
        assert_eq!(cache.get(&"old".into()), Some(1));
        assert_eq!(cache.get(&"new".into()), Some(3));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = cache(2);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        cache.insert("a".into(), 10);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a".into()), Some(10));
        assert_eq!(cache.get(&"b".into()), Some(2));
    }

    #[test]
    fn test_stats() {
        let cache = cache(4);
        cache.insert("a".into(), 1);
        cache.get(&"a".into());
        cache.get(&"a".into());
        cache.get(&"missing".into());

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result: ResilienceResult<TtlCache<String, u32>> =
            TtlCache::new("bad", 0, Duration::from_secs(1));
        assert_eq!(result.err(), Some(ResilienceError::ZeroCapacity));
    }
}
