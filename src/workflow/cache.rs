//! Memoized dependency inference.
//!
//! Inference is O(n² · f); the text view re-runs it on every keystroke, so
//! results are cached by a content hash of the record list.

use moka::sync::Cache;
use serde_json::Value;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::graph::{infer_edges_with, Edge, MatchMode};
use super::types::ActionRecord;

/// Default cache capacity (number of distinct documents).
const DEFAULT_CACHE_CAPACITY: u64 = 64;

/// Default time-to-idle for cached edge sets (5 minutes).
const DEFAULT_TTI_SECS: u64 = 300;

/// Cache key: content hash plus the match mode that produced the edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    content_hash: u64,
    mode: MatchMode,
}

/// Edge cache keyed by document content.
#[derive(Clone)]
pub struct EdgeCache {
    cache: Cache<CacheKey, Arc<Vec<Edge>>>,
}

impl EdgeCache {
    /// Create a cache with default settings.
    pub fn new() -> Self {
        Self::with_config(DEFAULT_CACHE_CAPACITY, DEFAULT_TTI_SECS)
    }

    /// Create a cache with custom capacity and idle timeout.
    pub fn with_config(max_capacity: u64, tti_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_idle(Duration::from_secs(tti_secs))
            .build();

        Self { cache }
    }

    /// Return cached edges for these records, inferring them on a miss.
    pub fn get_or_infer(&self, records: &[ActionRecord], mode: MatchMode) -> Arc<Vec<Edge>> {
        let key = CacheKey {
            content_hash: hash_records(records),
            mode,
        };

        if let Some(edges) = self.cache.get(&key) {
            trace!(hash = key.content_hash, "Edge cache hit");
            return edges;
        }

        let edges = Arc::new(infer_edges_with(records, mode));
        self.cache.insert(key, edges.clone());
        edges
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks();
        CacheStats {
            entry_count: self.cache.entry_count(),
        }
    }
}

impl Default for EdgeCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of entries in the cache
    pub entry_count: u64,
}

/// Hash of the record list content, order-sensitive.
pub fn hash_records(records: &[ActionRecord]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    records.len().hash(&mut hasher);
    for record in records {
        // Field order changes the hash; that only costs a recomputation.
        record.len().hash(&mut hasher);
        for (key, value) in record.fields() {
            key.hash(&mut hasher);
            hash_value(value, &mut hasher);
        }
    }
    hasher.finish()
}

fn hash_value<H: Hasher>(value: &Value, hasher: &mut H) {
    std::mem::discriminant(value).hash(hasher);
    match value {
        Value::Null => {}
        Value::Bool(b) => b.hash(hasher),
        Value::Number(n) => n.to_string().hash(hasher),
        Value::String(s) => s.hash(hasher),
        Value::Array(items) => {
            items.len().hash(hasher);
            for item in items {
                hash_value(item, hasher);
            }
        }
        Value::Object(map) => {
            map.len().hash(hasher);
            for (key, item) in map {
                key.hash(hasher);
                hash_value(item, hasher);
            }
        }
    }
}
