//! Bounded embedding caches wrapped around embedder calls.
//!
//! Two layers: per-input caches around `embed_text` and `embed_diff`
//! separately, and a composite per-descriptor cache that short-circuits
//! the whole embedding step. Lookups use `peek` so entries are never
//! promoted and eviction stays in insertion order.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

/// Observable cache counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Lookups answered from a cache layer.
    pub hits: u64,
    /// Lookups that fell through to the embedder.
    pub misses: u64,
    /// Entries currently held across all layers.
    pub size: usize,
}

impl CacheStats {
    /// Fraction of lookups served from cache; 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Two-layer LRU cache for embedding vectors.
pub struct EmbeddingCache {
    text: Mutex<LruCache<String, Vec<f32>>>,
    diff: Mutex<LruCache<String, Vec<f32>>>,
    composite: Mutex<LruCache<u32, (Vec<f32>, Vec<f32>)>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Builds a cache whose layers each hold up to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("nonzero capacity");
        Self {
            text: Mutex::new(LruCache::new(capacity)),
            diff: Mutex::new(LruCache::new(capacity)),
            composite: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Stable composite key over the three content fields.
    pub fn composite_key(title: &str, description: &str, diff: &str) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(title.as_bytes());
        hasher.update(description.as_bytes());
        hasher.update(diff.as_bytes());
        hasher.finalize()
    }

    /// Looks up both vectors for a descriptor by composite key.
    pub fn get_composite(&self, key: u32) -> Option<(Vec<f32>, Vec<f32>)> {
        let found = self.composite.lock().peek(&key).cloned();
        self.count(found.is_some());
        found
    }

    /// Records both vectors for a descriptor.
    pub fn put_composite(&self, key: u32, text: Vec<f32>, diff: Vec<f32>) {
        self.composite.lock().put(key, (text, diff));
    }

    /// Looks up a text-embedding by raw input string.
    pub fn get_text(&self, input: &str) -> Option<Vec<f32>> {
        let found = self.text.lock().peek(input).cloned();
        self.count(found.is_some());
        found
    }

    /// Records a text-embedding result.
    pub fn put_text(&self, input: String, vector: Vec<f32>) {
        self.text.lock().put(input, vector);
    }

    /// Looks up a diff-embedding by raw input string.
    pub fn get_diff(&self, input: &str) -> Option<Vec<f32>> {
        let found = self.diff.lock().peek(input).cloned();
        self.count(found.is_some());
        found
    }

    /// Records a diff-embedding result.
    pub fn put_diff(&self, input: String, vector: Vec<f32>) {
        self.diff.lock().put(input, vector);
    }

    /// Current counters and entry count.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.text.lock().len() + self.diff.lock().len() + self.composite.lock().len(),
        }
    }

    /// Drops every entry and resets both counters.
    pub fn clear(&self) {
        self.text.lock().clear();
        self.diff.lock().clear();
        self.composite.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    fn count(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}
