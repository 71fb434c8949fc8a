//! LRU segment cache
//!
//! Holds complete upstream objects (segments, keys, init sections, direct
//! video files) fetched by the segment proxy. Entries expire after a TTL and
//! the least recently accessed entries are evicted when either the entry
//! count or the memory budget would be exceeded.

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;
use tracing::debug;

/// Segment cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentCacheConfig {
    /// When false every lookup misses and nothing is stored
    pub enabled: bool,

    /// Maximum memory usage in megabytes
    pub max_memory_mb: usize,

    /// Maximum number of cached objects
    pub max_entries: usize,

    /// Time-to-live for cached objects in seconds
    pub ttl_secs: u64,

    /// Objects larger than this are streamed but never cached
    pub max_entry_mb: usize,
}

impl Default for SegmentCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_memory_mb: 256,
            max_entries: 500,
            ttl_secs: 300,
            max_entry_mb: 32,
        }
    }
}

impl SegmentCacheConfig {
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_mb * 1024 * 1024
    }

    pub fn max_entry_bytes(&self) -> usize {
        self.max_entry_mb * 1024 * 1024
    }
}

/// A complete upstream object plus the headers needed to replay it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSegment {
    pub data: Bytes,
    pub content_type: String,
    pub etag: Option<String>,
}

impl CachedSegment {
    pub fn new(data: Bytes, content_type: &str) -> Self {
        Self {
            data,
            content_type: content_type.to_string(),
            etag: None,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    segment: CachedSegment,
    created_at: SystemTime,
    last_accessed: SystemTime,
    access_count: usize,
}

impl CacheEntry {
    fn new(segment: CachedSegment) -> Self {
        let now = SystemTime::now();
        Self {
            segment,
            created_at: now,
            last_accessed: now,
            access_count: 1,
        }
    }

    fn touch(&mut self) {
        self.last_accessed = SystemTime::now();
        self.access_count += 1;
    }

    fn age_secs(&self) -> u64 {
        self.created_at.elapsed().map(|d| d.as_secs()).unwrap_or(0)
    }

    fn is_expired(&self, ttl_secs: u64) -> bool {
        self.created_at
            .elapsed()
            .map(|d| d.as_secs_f64() > ttl_secs as f64)
            .unwrap_or(false)
    }

    fn size(&self) -> usize {
        self.segment.data.len()
    }
}

/// Segment cache keyed by upstream URL
pub struct SegmentCache {
    entries: DashMap<String, CacheEntry>,
    memory_bytes: AtomicUsize,
    config: SegmentCacheConfig,
}

impl SegmentCache {
    pub fn new(config: SegmentCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            memory_bytes: AtomicUsize::new(0),
            config,
        }
    }

    pub fn config(&self) -> &SegmentCacheConfig {
        &self.config
    }

    /// Whether an object of `size` bytes would be accepted.
    pub fn accepts(&self, size: usize) -> bool {
        self.config.enabled && size <= self.config.max_entry_bytes() && size <= self.config.max_memory_bytes()
    }

    /// Get a cached object. Expired entries are dropped and miss.
    pub fn get(&self, url: &str) -> Option<CachedSegment> {
        if !self.config.enabled {
            return None;
        }
        {
            let mut entry = self.entries.get_mut(url)?;
            if !entry.is_expired(self.config.ttl_secs) {
                entry.touch();
                return Some(entry.segment.clone());
            }
        }
        self.remove(url);
        None
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    /// Cache an object. Oversized objects are ignored.
    pub fn insert(&self, url: &str, segment: CachedSegment) {
        let size = segment.data.len();
        if !self.accepts(size) {
            debug!(url, size, "not caching object");
            return;
        }

        // Replacing an entry must not double-count its bytes.
        self.remove(url);

        let current = self.memory_bytes.load(Ordering::Relaxed);
        if current + size > self.config.max_memory_bytes() || self.entries.len() >= self.config.max_entries {
            self.evict_if_needed(size);
        }

        self.entries.insert(url.to_string(), CacheEntry::new(segment));
        self.memory_bytes.fetch_add(size, Ordering::Relaxed);
    }

    fn remove(&self, url: &str) {
        if let Some((_, old)) = self.entries.remove(url) {
            self.memory_bytes.fetch_sub(old.size(), Ordering::Relaxed);
        }
    }

    /// Make room for `needed_size` more bytes and one more entry.
    fn evict_if_needed(&self, needed_size: usize) {
        self.evict_expired();

        let usage = self.memory_bytes.load(Ordering::Relaxed);
        let over_memory = usage + needed_size > self.config.max_memory_bytes();
        let over_count = self.entries.len() >= self.config.max_entries;
        if !over_memory && !over_count {
            return;
        }

        let mut candidates: Vec<(SystemTime, String, usize)> = self
            .entries
            .iter()
            .map(|e| (e.value().last_accessed, e.key().clone(), e.value().size()))
            .collect();
        candidates.sort_unstable_by_key(|(t, _, _)| *t);

        let mut usage = usage;
        let mut count = self.entries.len();
        for (_, key, size) in candidates {
            if usage + needed_size <= self.config.max_memory_bytes() && count < self.config.max_entries {
                break;
            }
            if self.entries.remove(&key).is_some() {
                usage = usage.saturating_sub(size);
                count -= 1;
            }
        }

        let after: usize = self.entries.iter().map(|e| e.value().size()).sum();
        self.memory_bytes.store(after, Ordering::Relaxed);
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.is_expired(self.config.ttl_secs));
        let usage: usize = self.entries.iter().map(|e| e.value().size()).sum();
        self.memory_bytes.store(usage, Ordering::Relaxed);
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.memory_bytes.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.memory_bytes.load(Ordering::Relaxed)
    }

    /// Get cache statistics
    pub fn stats(&self) -> SegmentCacheStats {
        let mut count = 0;
        let mut total_size = 0;
        let mut oldest_age = 0;
        let mut hits = 0;

        for entry in self.entries.iter() {
            count += 1;
            total_size += entry.value().size();
            oldest_age = oldest_age.max(entry.value().age_secs());
            hits += entry.value().access_count.saturating_sub(1);
        }

        SegmentCacheStats {
            enabled: self.config.enabled,
            entry_count: count,
            max_entries: self.config.max_entries,
            total_size_bytes: total_size,
            memory_limit_bytes: self.config.max_memory_bytes(),
            oldest_entry_age_secs: oldest_age,
            ttl_secs: self.config.ttl_secs,
            hits_on_live_entries: hits,
        }
    }
}

impl Default for SegmentCache {
    fn default() -> Self {
        Self::new(SegmentCacheConfig::default())
    }
}

/// Segment cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct SegmentCacheStats {
    pub enabled: bool,
    pub entry_count: usize,
    pub max_entries: usize,
    pub total_size_bytes: usize,
    pub memory_limit_bytes: usize,
    pub oldest_entry_age_secs: u64,
    pub ttl_secs: u64,
    pub hits_on_live_entries: usize,
}
