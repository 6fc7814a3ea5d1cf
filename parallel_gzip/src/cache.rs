//! Small LRU caches for decoded chunks.
//!
//! Capacities are tiny (a few multiples of the parallelism), so recency is
//! a plain vector: updates are O(capacity) on data that fits in a cache
//! line or two, which beats pointer-chasing list structures at this size.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub capacity: usize,
    pub size: usize,
}

#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    /// Keys ordered oldest first.
    recency: Vec<K>,
    hits: u64,
    misses: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            recency: Vec::with_capacity(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Existence check without touching recency or counters.
    pub fn test(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        if let Some(value) = self.entries.get(key) {
            let value = value.clone();
            self.hits += 1;
            self.mark_recent(key);
            Some(value)
        } else {
            self.misses += 1;
            None
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.entries.insert(key.clone(), value).is_none() {
            if self.entries.len() > self.capacity {
                if let Some(oldest) = self.recency.first().cloned() {
                    self.entries.remove(&oldest);
                    self.recency.remove(0);
                }
            }
            self.recency.push(key);
        } else {
            self.mark_recent(&key);
        }
    }

    /// Moves the key to the most-recent position if present.
    pub fn touch(&mut self, key: &K) {
        if self.entries.contains_key(key) {
            self.mark_recent(key);
        }
    }

    pub fn evict(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.recency.retain(|k| k != key);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    /// The key that would be evicted after `n` more unrelated insertions
    /// (0 = the next victim). Lets the prefetcher avoid scheduling work
    /// whose result would immediately evict another pending prefetch.
    pub fn nth_eviction_candidate(&self, n: usize) -> Option<&K> {
        self.recency.get(n)
    }

    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            hits: self.hits,
            misses: self.misses,
            capacity: self.capacity,
            size: self.entries.len(),
        }
    }

    fn mark_recent(&mut self, key: &K) {
        if let Some(position) = self.recency.iter().position(|k| k == key) {
            let key = self.recency.remove(position);
            self.recency.push(key);
        }
    }
}
