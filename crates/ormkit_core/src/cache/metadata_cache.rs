use super::{Cache, CacheStatistics, EvictionPolicy, MemoryCache};

const ENTITY_TAG: &str = "entity_metadata";
const PROPERTY_TAG: &str = "property_metadata";

/// Metadata cache: entries are auto-tagged with `entity_metadata` /
/// `property_metadata` plus the entity name, and stored with infinite TTL
/// regardless of the base cache configuration.
pub struct MetadataCache<V> {
    inner: MemoryCache<V>,
}

impl<V: Clone> MetadataCache<V> {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: MemoryCache::new(max_size, EvictionPolicy::Lru),
        }
    }

    pub fn set_entity_metadata(&self, entity: &str, value: V) {
        let key = entity_key(entity);
        self.inner.set_forever(&key, value);
        self.inner.tag(&key, &[ENTITY_TAG, entity]);
    }

    pub fn get_entity_metadata(&self, entity: &str) -> Option<V> {
        self.inner.get(&entity_key(entity))
    }

    pub fn set_property_metadata(&self, entity: &str, property: &str, value: V) {
        let key = property_key(entity, property);
        self.inner.set_forever(&key, value);
        self.inner.tag(&key, &[PROPERTY_TAG, entity]);
    }

    pub fn get_property_metadata(&self, entity: &str, property: &str) -> Option<V> {
        self.inner.get(&property_key(entity, property))
    }

    /// Drop every entry for one entity, both entity- and property-level.
    pub fn invalidate_entity(&self, entity: &str) -> usize {
        self.inner.invalidate_tag(entity)
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.inner.statistics()
    }
}

fn entity_key(entity: &str) -> String {
    format!("entity:{}", entity)
}

fn property_key(entity: &str, property: &str) -> String {
    format!("property:{}::{}", entity, property)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_invalidation_drops_property_entries_too() {
        let cache: MetadataCache<String> = MetadataCache::new(16);
        cache.set_entity_metadata("User", "desc".to_string());
        cache.set_property_metadata("User", "name", "col".to_string());
        cache.set_entity_metadata("Post", "desc".to_string());

        assert_eq!(cache.invalidate_entity("User"), 2);
        assert!(cache.get_entity_metadata("User").is_none());
        assert!(cache.get_entity_metadata("Post").is_some());
    }

    #[test]
    fn entries_survive_without_ttl() {
        let cache: MetadataCache<i32> = MetadataCache::new(4);
        cache.set_entity_metadata("User", 1);
        assert_eq!(cache.get_entity_metadata("User"), Some(1));
    }
}
