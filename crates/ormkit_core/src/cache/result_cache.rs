use super::{Cache, CacheStatistics, EvictionPolicy, MemoryCache};
use crate::driver::RowSet;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::time::Duration;

/// Stored payload: serialised rows, gzip-compressed above the threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedPayload {
    compressed: bool,
    data: Vec<u8>,
}

/// Result-set cache.
///
/// Payloads larger than the threshold are gzip-compressed; reads
/// transparently decompress. Malformed payloads read as a miss and are
/// logged. Entries tagged with the tables they came from support
/// `invalidate_table`.
pub struct ResultSetCache {
    inner: MemoryCache<CachedPayload>,
    compression_threshold: usize,
}

impl ResultSetCache {
    pub fn new(max_size: usize, policy: EvictionPolicy) -> Self {
        Self {
            inner: MemoryCache::new(max_size, policy),
            compression_threshold: 4096,
        }
    }

    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Cache a result set, tagging it with the tables it was read from.
    pub fn set_result(
        &self,
        key: &str,
        result: &RowSet,
        ttl: Option<Duration>,
        tables: &[&str],
    ) {
        let encoded = match serde_json::to_vec(result) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("result cache: failed to encode payload for {}: {}", key, e);
                return;
            }
        };

        let payload = if encoded.len() > self.compression_threshold {
            match compress(&encoded) {
                Ok(data) => CachedPayload {
                    compressed: true,
                    data,
                },
                Err(e) => {
                    log::warn!("result cache: compression failed for {}: {}", key, e);
                    CachedPayload {
                        compressed: false,
                        data: encoded,
                    }
                }
            }
        } else {
            CachedPayload {
                compressed: false,
                data: encoded,
            }
        };

        self.inner.set(key, payload, ttl);
        let tags: Vec<String> = tables.iter().map(|t| format!("table:{}", t)).collect();
        let tag_refs: Vec<&str> = tags.iter().map(String::as_str).collect();
        self.inner.tag(key, &tag_refs);
    }

    /// Read a cached result set; corrupt payloads read as absent.
    pub fn get_result(&self, key: &str) -> Option<RowSet> {
        let payload = self.inner.get(key)?;

        let bytes = if payload.compressed {
            match decompress(&payload.data) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("result cache: corrupt compressed payload for {}: {}", key, e);
                    self.inner.delete(key);
                    return None;
                }
            }
        } else {
            payload.data
        };

        match serde_json::from_slice(&bytes) {
            Ok(result) => Some(result),
            Err(e) => {
                log::warn!("result cache: corrupt payload for {}: {}", key, e);
                self.inner.delete(key);
                None
            }
        }
    }

    /// Drop every cached result read from the given table.
    pub fn invalidate_table(&self, table: &str) -> usize {
        self.inner.invalidate_tag(&format!("table:{}", table))
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.delete(key)
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.inner.statistics()
    }
}

fn compress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn decompress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ColumnMeta;
    use crate::Value;

    fn sample(rows: usize) -> RowSet {
        RowSet {
            columns: vec![ColumnMeta {
                name: "name".to_string(),
                type_name: "varchar".to_string(),
                nullable: false,
            }],
            rows: (0..rows)
                .map(|i| vec![Value::Text(format!("row-{}", i))])
                .collect(),
        }
    }

    #[test]
    fn small_payloads_round_trip_uncompressed() {
        let cache = ResultSetCache::new(8, EvictionPolicy::Lru);
        cache.set_result("q1", &sample(2), None, &["users"]);

        let restored = cache.get_result("q1").unwrap();
        assert_eq!(restored.row_count(), 2);
    }

    #[test]
    fn large_payloads_compress_and_round_trip() {
        let cache =
            ResultSetCache::new(8, EvictionPolicy::Lru).with_compression_threshold(64);
        cache.set_result("q1", &sample(200), None, &["users"]);

        let restored = cache.get_result("q1").unwrap();
        assert_eq!(restored.row_count(), 200);
    }

    #[test]
    fn table_invalidation_drops_tagged_entries() {
        let cache = ResultSetCache::new(8, EvictionPolicy::Lru);
        cache.set_result("q1", &sample(1), None, &["users"]);
        cache.set_result("q2", &sample(1), None, &["users", "posts"]);
        cache.set_result("q3", &sample(1), None, &["posts"]);

        assert_eq!(cache.invalidate_table("users"), 2);
        assert!(cache.get_result("q1").is_none());
        assert!(cache.get_result("q3").is_some());
    }
}
