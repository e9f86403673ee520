//! # SwKit Cache
//!
//! Named cache buckets for the SwKit service-worker toolkit.
//!
//! ## Features
//!
//! - **Cache**: a single bucket mapping request keys to stored responses
//! - **CacheStorage**: the set of named buckets owned by one worker scope
//! - **Key normalization**: query parameters matching ignore rules are
//!   stripped before keys are compared
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage
//!     ├── "precache-v1" (Cache)
//!     │       └── key → CacheEntry
//!     └── "default-handler-cache" (Cache)
//!             └── key → CacheEntry
//! ```
//!
//! Keys are normalized URL strings. Callers that honor ignore rules
//! normalize with [`keys::normalize_cache_key`] before reading or writing.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

pub mod keys;

pub use keys::{normalize_cache_key, IgnoreParamRule};

/// Errors that can occur in cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid ignore-parameter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A stored response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The key the entry was stored under.
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Create a new entry with the current timestamp.
    pub fn new(url: impl Into<String>, status: u16, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: HashMap::new(),
            body,
            cached_at: now_ms(),
        }
    }

    /// Attach a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A single named cache bucket.
#[derive(Debug, Default)]
pub struct Cache {
    /// Bucket name.
    pub name: String,

    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new bucket.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Look up an entry by exact key.
    pub fn match_key(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Look up an entry, normalizing the request URL against ignore rules
    /// first.
    pub fn match_with_rules(&self, url: &str, rules: &[IgnoreParamRule]) -> Option<&CacheEntry> {
        let key = normalize_cache_key(url, rules);
        trace!(bucket = %self.name, %url, %key, "cache lookup");
        self.entries.get(&key)
    }

    /// Store an entry under a key.
    pub fn put(&mut self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    /// Remove an entry. Returns true if it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// All stored keys.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every key not in `keep`, returning the removed keys.
    pub fn retain_keys(&mut self, keep: &[String]) -> Vec<String> {
        let removed: Vec<String> = self
            .entries
            .keys()
            .filter(|k| !keep.iter().any(|keep_key| keep_key == *k))
            .cloned()
            .collect();
        for key in &removed {
            self.entries.remove(key);
        }
        removed
    }
}

/// The set of named buckets owned by one worker scope.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a bucket, creating it if it does not exist.
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a bucket without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if a bucket exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a bucket.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All bucket names.
    pub fn bucket_names(&self) -> Vec<&str> {
        self.caches.keys().map(|s| s.as_str()).collect()
    }

    /// Look up a key across all buckets.
    pub fn match_key(&self, key: &str) -> Option<&CacheEntry> {
        self.caches.values().find_map(|cache| cache.match_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_put_and_match() {
        let mut cache = Cache::new("v1");
        cache.put("/style.css", CacheEntry::new("/style.css", 200, Vec::new()));

        assert!(cache.match_key("/style.css").is_some());
        assert!(cache.match_key("/other.css").is_none());
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("v1");
        cache.put("/style.css", CacheEntry::new("/style.css", 200, Vec::new()));

        assert!(cache.delete("/style.css"));
        assert!(!cache.delete("/style.css"));
        assert!(cache.match_key("/style.css").is_none());
    }

    #[test]
    fn test_cache_retain_keys() {
        let mut cache = Cache::new("v1");
        cache.put("/a.js", CacheEntry::new("/a.js", 200, Vec::new()));
        cache.put("/b.js", CacheEntry::new("/b.js", 200, Vec::new()));

        let removed = cache.retain_keys(&["/a.js".to_string()]);
        assert_eq!(removed, vec!["/b.js".to_string()]);
        assert!(cache.match_key("/a.js").is_some());
        assert!(cache.match_key("/b.js").is_none());
    }

    #[test]
    fn test_match_with_rules_ignores_matching_params() {
        let rules = vec![IgnoreParamRule::new("hash").unwrap()];
        let mut cache = Cache::new("v1");
        cache.put("/app", CacheEntry::new("/app", 200, Vec::new()));

        assert!(cache.match_with_rules("/app?hash=abc123", &rules).is_some());
        assert!(cache.match_with_rules("/app?page=2", &rules).is_none());
    }

    #[test]
    fn test_cache_storage_open_creates() {
        let mut storage = CacheStorage::new();
        assert!(!storage.has("v1"));

        storage.open("v1");
        assert!(storage.has("v1"));

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
    }

    #[test]
    fn test_cache_storage_match_across_buckets() {
        let mut storage = CacheStorage::new();
        storage
            .open("a")
            .put("/x", CacheEntry::new("/x", 200, Vec::new()));
        storage
            .open("b")
            .put("/y", CacheEntry::new("/y", 200, Vec::new()));

        assert!(storage.match_key("/x").is_some());
        assert!(storage.match_key("/y").is_some());
        assert!(storage.match_key("/z").is_none());
    }
}
