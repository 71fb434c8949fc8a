use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::types::AggregationResult;

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCacheConfig {
    /// When false every lookup misses and nothing is stored
    pub enabled: bool,

    /// Time-to-live for cached results in seconds
    pub ttl_secs: u64,

    /// Maximum number of cached results
    pub max_entries: usize,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 2 * 60 * 60,
            max_entries: 2000,
        }
    }
}

struct Entry {
    value: AggregationResult,
    created_at: Instant,
}

/// Finished aggregation results, keyed by `MediaRequest::cache_key`.
///
/// Reads use `peek`, so a hit does not refresh recency and overflow evicts
/// the oldest insertion first.
pub struct ResponseCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(config: ResponseCacheConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            ttl: Duration::from_secs(config.ttl_secs),
            enabled: config.enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look up a result. An expired entry is removed on the way out.
    pub fn get(&self, key: &str) -> Option<AggregationResult> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.entries.lock();
        let expired = match entries.peek(key) {
            Some(entry) if entry.created_at.elapsed() <= self.ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
            debug!(key, "response cache entry expired");
        }
        None
    }

    pub fn put(&self, key: &str, value: AggregationResult) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.lock();
        // Re-inserting must count as a fresh insertion for eviction order.
        entries.pop(key);
        if let Some((evicted, _)) = entries.push(
            key.to_string(),
            Entry {
                value,
                created_at: Instant::now(),
            },
        ) {
            if evicted != key {
                debug!(evicted = %evicted, "response cache full, evicted oldest");
            }
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.created_at.elapsed() > self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ResponseCacheStats {
        let entries = self.entries.lock();
        ResponseCacheStats {
            enabled: self.enabled,
            entry_count: entries.len(),
            max_entries: entries.cap().get(),
            ttl_secs: self.ttl.as_secs(),
            oldest_entry_age_secs: entries
                .iter()
                .map(|(_, e)| e.created_at.elapsed().as_secs())
                .max()
                .unwrap_or(0),
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(ResponseCacheConfig::default())
    }
}

/// Response cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct ResponseCacheStats {
    pub enabled: bool,
    pub entry_count: usize,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub oldest_entry_age_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileSource;

    fn result(url: &str) -> AggregationResult {
        AggregationResult {
            files: vec![FileSource::new("p", url)],
            ..Default::default()
        }
    }

    #[test]
    fn test_put_get() {
        let cache = ResponseCache::default();
        cache.put("movie:1", result("https://a/1.m3u8"));
        assert_eq!(cache.get("movie:1"), Some(result("https://a/1.m3u8")));
        assert_eq!(cache.get("movie:2"), None);
    }

    #[test]
    fn test_overflow_evicts_oldest_insertion() {
        let cache = ResponseCache::new(ResponseCacheConfig {
            max_entries: 2,
            ..Default::default()
        });
        cache.put("a", result("https://a/a"));
        cache.put("b", result("https://a/b"));
        // a read must not protect "a"
        assert!(cache.get("a").is_some());
        cache.put("c", result("https://a/c"));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_expired_entries_miss_and_sweep() {
        let cache = ResponseCache::new(ResponseCacheConfig {
            ttl_secs: 0,
            ..Default::default()
        });
        cache.put("a", result("https://a/a"));
        cache.put("b", result("https://a/b"));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.evict_expired(), 2);
        assert!(cache.is_empty());

        cache.put("c", result("https://a/c"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("c").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = ResponseCache::new(ResponseCacheConfig {
            enabled: false,
            ..Default::default()
        });
        cache.put("a", result("https://a/a"));
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
        assert!(!cache.stats().enabled);
    }
}
