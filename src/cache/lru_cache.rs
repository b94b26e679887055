use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    last_access: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_access: now,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// Bounded cache with TTL expiry and least-recently-used eviction.
///
/// Eviction scans for the oldest access time, which is fine for the small
/// capacities this is used with.
#[derive(Debug)]
pub struct LRUCache<K: Eq + Hash, V> {
    data: DashMap<K, CacheEntry<V>>,
    capacity: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> LRUCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn with_ttl(capacity: usize, ttl: Duration) -> Self {
        Self {
            data: DashMap::with_capacity(capacity),
            capacity: capacity.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn put(&self, key: K, value: V) -> Option<V> {
        if !self.data.contains_key(&key) && self.data.len() >= self.capacity {
            self.evict_one();
        }
        self.data.insert(key, CacheEntry::new(value)).map(|old| old.value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut expired = false;
        let value = self.data.get_mut(key).and_then(|mut entry| {
            if entry.is_expired(self.ttl) {
                expired = true;
                None
            } else {
                entry.last_access = Instant::now();
                Some(entry.value.clone())
            }
        });

        // The shard guard is released by now.
        if expired {
            self.data.remove(key);
        }

        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        value
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.data.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(self.ttl));
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            debug!("Removed {} expired cache entries", removed);
        }
        removed
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn evict_one(&self) {
        let oldest = self
            .data
            .iter()
            .min_by_key(|entry| entry.value().last_access)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.data.remove(&key);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}
