use super::{Cache, CacheStatistics, EvictionPolicy, MemoryCache};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Rendered SQL and its placeholder layout, as produced by a builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStructure {
    pub sql: String,
    pub placeholders: Vec<String>,
}

/// Caches the SQL of frequently-built queries keyed by a fingerprint of the
/// builder state, so repeated builds of the same shape skip rendering.
pub struct QueryStructureCache {
    inner: MemoryCache<QueryStructure>,
}

impl QueryStructureCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: MemoryCache::new(max_size, EvictionPolicy::Lfu),
        }
    }

    /// Fingerprint a canonical description of builder state.
    pub fn fingerprint(shape: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(shape.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, fingerprint: &str) -> Option<QueryStructure> {
        self.inner.get(fingerprint)
    }

    pub fn set(&self, fingerprint: &str, structure: QueryStructure) {
        self.inner.set_forever(fingerprint, structure);
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.inner.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_shape_sensitive() {
        let a = QueryStructureCache::fingerprint("select:users:id,name");
        let b = QueryStructureCache::fingerprint("select:users:id,name");
        let c = QueryStructureCache::fingerprint("select:users:id");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn stores_and_returns_structures() {
        let cache = QueryStructureCache::new(8);
        let fp = QueryStructureCache::fingerprint("shape");
        cache.set(
            &fp,
            QueryStructure {
                sql: "SELECT 1".to_string(),
                placeholders: vec![],
            },
        );
        assert_eq!(cache.get(&fp).unwrap().sql, "SELECT 1");
    }
}
