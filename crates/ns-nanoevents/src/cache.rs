//! LRU runtime cache for evaluated form-key programs.
//!
//! Every buffer produced by the form-key interpreter (loaded branches,
//! offsets, global indices) is cached under `"{partition_key}/{program}"`.
//! Intermediate programs are cached too, so collections that share an
//! offsets program (`nJet,!load,!counts2offsets`) compute it once.
//!
//! - **Value**: `Arc<Array>`, shared with every view that reads it.
//! - **Capacity**: bounded by total bytes, not entry count.
//! - **Recency**: a monotonically increasing tick per access; the entry with
//!   the smallest tick is evicted first.
//! - **Thread-safety**: `Mutex<Inner>`; field materialization runs in
//!   parallel but evaluation time dominates lock hold time.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::array::Array;

/// Configuration for the runtime cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum total bytes of cached arrays. Default: 256 MiB.
    pub max_bytes: usize,
    /// Whether caching is enabled. When `false`, `get`/`insert` are no-ops.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_bytes: 256 * 1024 * 1024, enabled: true }
    }
}

impl CacheConfig {
    /// A disabled (no-op) cache config.
    pub fn disabled() -> Self {
        Self { max_bytes: 0, enabled: false }
    }

    /// Set the byte budget.
    pub fn max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries currently cached.
    pub entries: usize,
    /// Bytes currently cached.
    pub bytes: usize,
}

struct Entry {
    data: Arc<Array>,
    size: usize,
    tick: u64,
}

struct Inner {
    map: HashMap<String, Entry>,
    /// tick -> key, ordered from least to most recently used.
    order: BTreeMap<u64, String>,
    next_tick: u64,
    current_bytes: usize,
    max_bytes: usize,
    hits: u64,
    misses: u64,
}

impl Inner {
    fn touch(&mut self, key: &str) -> Option<Arc<Array>> {
        let tick = self.next_tick;
        let entry = self.map.get_mut(key)?;
        self.order.remove(&entry.tick);
        entry.tick = tick;
        self.order.insert(tick, key.to_string());
        self.next_tick += 1;
        Some(Arc::clone(&entry.data))
    }

    fn remove(&mut self, key: &str) {
        if let Some(old) = self.map.remove(key) {
            self.order.remove(&old.tick);
            self.current_bytes = self.current_bytes.saturating_sub(old.size);
        }
    }

    fn evict_until_fits(&mut self, incoming: usize) {
        while self.current_bytes + incoming > self.max_bytes {
            let Some((_, key)) = self.order.pop_first() else { break };
            if let Some(evicted) = self.map.remove(&key) {
                self.current_bytes = self.current_bytes.saturating_sub(evicted.size);
                log::debug!("runtime cache evicted {key} ({} bytes)", evicted.size);
            }
        }
    }
}

/// Thread-safe, byte-bounded LRU cache of evaluated arrays.
pub struct ColumnCache {
    inner: Mutex<Inner>,
    enabled: bool,
}

impl std::fmt::Debug for ColumnCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnCache")
            .field("enabled", &self.enabled)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ColumnCache {
    /// Create a cache from a config.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
                current_bytes: 0,
                max_bytes: config.max_bytes,
                hits: 0,
                misses: 0,
            }),
            enabled: config.enabled,
        }
    }

    /// Whether the cache stores anything.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look up `key`, promoting it to most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<Array>> {
        if !self.enabled {
            return None;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match inner.touch(key) {
            Some(data) => {
                inner.hits += 1;
                Some(data)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert `data` under `key` and return the shared handle.
    ///
    /// Arrays larger than the whole budget are returned without being cached.
    pub fn insert(&self, key: &str, data: Array) -> Arc<Array> {
        let size = data.nbytes();
        let arc = Arc::new(data);
        if !self.enabled {
            return arc;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if size > inner.max_bytes {
            return arc;
        }
        inner.remove(key);
        inner.evict_until_fits(size);
        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.order.insert(tick, key.to_string());
        inner.map.insert(key.to_string(), Entry { data: Arc::clone(&arc), size, tick });
        inner.current_bytes += size;
        arc
    }

    /// Drop all entries (statistics are kept).
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.map.clear();
        inner.order.clear();
        inner.current_bytes = 0;
    }

    /// Snapshot of hit/miss counters and occupancy.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.map.len(),
            bytes: inner.current_bytes,
        }
    }
}

impl Default for ColumnCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(n: usize) -> Array {
        Array::from_vec(vec![0u8; n])
    }

    #[test]
    fn hit_and_miss_counters() {
        let cache = ColumnCache::default();
        assert!(cache.get("a").is_none());
        cache.insert("a", column(10));
        assert_eq!(cache.get("a").unwrap().len(), 10);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries, stats.bytes), (1, 1, 1, 10));
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = ColumnCache::new(CacheConfig::default().max_bytes(25));
        cache.insert("a", column(10));
        cache.insert("b", column(10));
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get("a");
        cache.insert("c", column(10));
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().bytes, 20);
    }

    #[test]
    fn oversized_entries_are_not_cached() {
        let cache = ColumnCache::new(CacheConfig::default().max_bytes(5));
        let arc = cache.insert("big", column(10));
        assert_eq!(arc.len(), 10);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn reinsert_replaces_size() {
        let cache = ColumnCache::default();
        cache.insert("a", column(10));
        cache.insert("a", column(4));
        assert_eq!(cache.stats().bytes, 4);
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn disabled_cache_is_noop() {
        let cache = ColumnCache::new(CacheConfig::disabled());
        cache.insert("a", column(1));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
