//! Generic key/value caching with TTL, bounded eviction and tag-based
//! invalidation, plus the specialised caches built on top of it.

mod metadata_cache;
mod query_cache;
mod result_cache;

pub use metadata_cache::MetadataCache;
pub use query_cache::{QueryStructure, QueryStructureCache};
pub use result_cache::ResultSetCache;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How a full cache chooses its victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Least recently used; ties broken by insertion order.
    Lru,
    /// Least frequently used; ties broken by oldest access.
    Lfu,
    /// Insertion order only.
    Fifo,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
        }
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
    pub eviction_policy: EvictionPolicy,
}

/// Cache contract shared by every specialisation.
pub trait Cache<V: Clone> {
    fn get(&self, key: &str) -> Option<V>;
    fn set(&self, key: &str, value: V, ttl: Option<Duration>);
    fn delete(&self, key: &str) -> bool;
    fn clear(&self);
    fn has(&self, key: &str) -> bool;

    fn get_many(&self, keys: &[&str]) -> Vec<Option<V>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    fn set_many(&self, entries: Vec<(String, V)>, ttl: Option<Duration>) {
        for (key, value) in entries {
            self.set(&key, value, ttl);
        }
    }

    fn delete_many(&self, keys: &[&str]) -> usize {
        keys.iter().filter(|key| self.delete(key)).count()
    }

    /// Attach tags to an existing key; re-adding a tag is idempotent.
    fn tag(&self, key: &str, tags: &[&str]);

    /// Remove every key bearing the tag; removals count as deletes.
    fn invalidate_tag(&self, tag: &str) -> usize;

    fn invalidate_tags(&self, tags: &[&str]) -> usize {
        tags.iter().map(|tag| self.invalidate_tag(tag)).sum()
    }

    fn statistics(&self) -> CacheStatistics;
}

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
    inserted_seq: u64,
    last_access_seq: u64,
    hits: u64,
    tags: HashSet<String>,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    writes: u64,
    deletes: u64,
    evictions: u64,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    counters: Counters,
    seq: u64,
}

/// In-memory cache with TTL, size-bounded eviction and tags.
///
/// Writes are serialised on an internal lock so the cache may be shared
/// across sessions; values are cloned out on read.
pub struct MemoryCache<V> {
    inner: Mutex<Inner<V>>,
    max_size: usize,
    policy: EvictionPolicy,
    default_ttl: Option<Duration>,
}

impl<V: Clone> MemoryCache<V> {
    pub fn new(max_size: usize, policy: EvictionPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                counters: Counters::default(),
                seq: 0,
            }),
            max_size: max_size.max(1),
            policy,
            default_ttl: None,
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Store with no expiry regardless of the configured default TTL.
    pub fn set_forever(&self, key: &str, value: V) {
        self.set_internal(key, value, None);
    }

    fn set_internal(&self, key: &str, value: V, expires_at: Option<Instant>) {
        let mut inner = lock(&self.inner);
        inner.seq += 1;
        let seq = inner.seq;
        inner.counters.writes += 1;

        if let Some(existing) = inner.entries.get_mut(key) {
            // Updating an existing key never triggers eviction.
            existing.value = value;
            existing.expires_at = expires_at;
            existing.last_access_seq = seq;
            return;
        }

        if inner.entries.len() >= self.max_size {
            if let Some(victim) = self.pick_victim(&inner) {
                inner.entries.remove(&victim);
                inner.counters.evictions += 1;
            }
        }

        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                inserted_seq: seq,
                last_access_seq: seq,
                hits: 0,
                tags: HashSet::new(),
            },
        );
    }

    fn pick_victim(&self, inner: &Inner<V>) -> Option<String> {
        let candidates = inner.entries.iter();
        let victim = match self.policy {
            EvictionPolicy::Lru => candidates
                .min_by_key(|(_, e)| (e.last_access_seq, e.inserted_seq)),
            EvictionPolicy::Lfu => candidates.min_by_key(|(_, e)| (e.hits, e.last_access_seq)),
            EvictionPolicy::Fifo => candidates.min_by_key(|(_, e)| e.inserted_seq),
        };
        victim.map(|(key, _)| key.clone())
    }
}

impl<V: Clone> Cache<V> for MemoryCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        let mut inner = lock(&self.inner);
        inner.seq += 1;
        let seq = inner.seq;

        let expired = matches!(
            inner.entries.get(key),
            Some(entry) if entry.expires_at.is_some_and(|at| Instant::now() >= at)
        );
        if expired {
            inner.entries.remove(key);
            inner.counters.evictions += 1;
            inner.counters.misses += 1;
            return None;
        }

        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access_seq = seq;
                entry.hits += 1;
                let value = entry.value.clone();
                inner.counters.hits += 1;
                Some(value)
            }
            None => {
                inner.counters.misses += 1;
                None
            }
        }
    }

    fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let expires_at = ttl
            .or(self.default_ttl)
            .map(|ttl| Instant::now() + ttl);
        self.set_internal(key, value, expires_at);
    }

    fn delete(&self, key: &str) -> bool {
        let mut inner = lock(&self.inner);
        let removed = inner.entries.remove(key).is_some();
        if removed {
            inner.counters.deletes += 1;
        }
        removed
    }

    fn clear(&self) {
        let mut inner = lock(&self.inner);
        let removed = inner.entries.len() as u64;
        inner.entries.clear();
        inner.counters.deletes += removed;
    }

    fn has(&self, key: &str) -> bool {
        let inner = lock(&self.inner);
        inner
            .entries
            .get(key)
            .is_some_and(|entry| !entry.expires_at.is_some_and(|at| Instant::now() >= at))
    }

    fn tag(&self, key: &str, tags: &[&str]) {
        let mut inner = lock(&self.inner);
        if let Some(entry) = inner.entries.get_mut(key) {
            for tag in tags {
                entry.tags.insert((*tag).to_string());
            }
        }
    }

    fn invalidate_tag(&self, tag: &str) -> usize {
        let mut inner = lock(&self.inner);
        let victims: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.tags.contains(tag))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &victims {
            inner.entries.remove(key);
        }
        inner.counters.deletes += victims.len() as u64;
        victims.len()
    }

    fn statistics(&self) -> CacheStatistics {
        let inner = lock(&self.inner);
        let lookups = inner.counters.hits + inner.counters.misses;
        CacheStatistics {
            hits: inner.counters.hits,
            misses: inner.counters.misses,
            writes: inner.counters.writes,
            deletes: inner.counters.deletes,
            evictions: inner.counters.evictions,
            size: inner.entries.len(),
            max_size: self.max_size,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.counters.hits as f64 / lookups as f64
            },
            eviction_policy: self.policy,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache = MemoryCache::new(2, EvictionPolicy::Lru);
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.get("a");
        cache.set("c", 3, None);

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert_eq!(cache.statistics().evictions, 1);
    }

    #[test]
    fn lfu_evicts_least_frequently_used() {
        let cache = MemoryCache::new(2, EvictionPolicy::Lfu);
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.get("a");
        cache.get("a");
        cache.get("b");
        cache.set("c", 3, None);

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
    }

    #[test]
    fn fifo_evicts_oldest_insert_regardless_of_access() {
        let cache = MemoryCache::new(2, EvictionPolicy::Fifo);
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.get("a");
        cache.set("c", 3, None);

        assert!(!cache.has("a"));
        assert!(cache.has("b"));
    }

    #[test]
    fn updates_do_not_trigger_eviction() {
        let cache = MemoryCache::new(2, EvictionPolicy::Lru);
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.set("a", 10, None);

        assert_eq!(cache.statistics().evictions, 0);
        assert_eq!(cache.get("a"), Some(10));
    }

    #[test]
    fn max_size_one_retains_exactly_the_last_key() {
        for policy in [EvictionPolicy::Lru, EvictionPolicy::Lfu, EvictionPolicy::Fifo] {
            let cache = MemoryCache::new(1, policy);
            cache.set("a", 1, None);
            cache.set("b", 2, None);
            assert!(!cache.has("a"), "policy {:?}", policy);
            assert_eq!(cache.get("b"), Some(2), "policy {:?}", policy);
            assert_eq!(cache.statistics().size, 1);
        }
    }

    #[test]
    fn size_never_exceeds_max_size() {
        let cache = MemoryCache::new(3, EvictionPolicy::Lru);
        for i in 0..20 {
            cache.set(&format!("k{}", i), i, None);
        }
        assert!(cache.statistics().size <= 3);
    }

    #[test]
    fn ttl_expiry_reads_as_miss() {
        let cache = MemoryCache::new(4, EvictionPolicy::Lru);
        cache.set("a", 1, Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get("a"), None);
        let stats = cache.statistics();
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn tag_invalidation_counts_as_deletes() {
        let cache = MemoryCache::new(8, EvictionPolicy::Lru);
        cache.set("k1", 1, None);
        cache.set("k2", 2, None);
        cache.set("k3", 3, None);
        cache.tag("k1", &["a"]);
        cache.tag("k2", &["a", "b"]);
        cache.tag("k3", &["b"]);

        assert_eq!(cache.invalidate_tag("a"), 2);
        assert!(cache.has("k3"));
        assert_eq!(cache.invalidate_tag("b"), 1);
        assert_eq!(cache.statistics().size, 0);
        assert_eq!(cache.statistics().deletes, 3);
    }

    #[test]
    fn tagging_twice_is_idempotent() {
        let cache = MemoryCache::new(4, EvictionPolicy::Lru);
        cache.set("k", 1, None);
        cache.tag("k", &["t"]);
        cache.tag("k", &["t"]);
        assert_eq!(cache.invalidate_tag("t"), 1);
    }

    #[test]
    fn get_many_preserves_request_order() {
        let cache = MemoryCache::new(4, EvictionPolicy::Lru);
        cache.set("a", 1, None);
        cache.set("c", 3, None);
        assert_eq!(cache.get_many(&["a", "b", "c"]), vec![Some(1), None, Some(3)]);
    }
}
