//! Backing store contract and the in-process store.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tracing::trace;

use super::config::CacheConfig;
use super::error::StoreError;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// Asynchronous key-value store holding envelope text.
///
/// Implementations only need to request expiry; enforcement is theirs.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// LRU-bounded in-memory store. Expired entries are dropped when read.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, Entry>>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.memory_capacity_non_zero())),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(&CacheConfig {
            memory_capacity: capacity,
            ..Default::default()
        })
    }

    /// Whether a live entry exists, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        rw_read(&self.entries, SOURCE, "contains")
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(Instant::now()))
    }

    /// Number of stored entries, expired ones included until read.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let now = Instant::now();
        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
            trace!(key, "Dropped expired entry");
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        rw_write(&self.entries, SOURCE, "set").put(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "del");
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| entries.pop(key.as_str()))
            .filter(|entry| !entry.is_expired(now))
            .count();
        Ok(removed as u64)
    }
}
