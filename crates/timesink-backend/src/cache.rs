//! Key-value cache trait and in-memory implementation.
//!
//! The cache is an optimization, never a source of truth: callers gate store
//! work on cache hits but re-derive everything from the store on a miss.
//! Values are small JSON documents (a sentinel `1` or a
//! `{"value_types": {…}}` snapshot) and every entry carries a TTL.

use crate::error::Result;
use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Cache operations used by the ingestion worker.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Fetch many keys at once; absent keys are simply missing from the map.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>>;

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    async fn set_many(&self, entries: &[(String, Value)], ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

struct CacheEntry {
    value: Value,
    expires_at: i64,
}

impl CacheEntry {
    fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: now_ms() + ttl.as_millis() as i64,
        }
    }

    fn is_expired(&self) -> bool {
        now_ms() >= self.expires_at
    }
}

/// Hit/miss counters for the in-memory cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

/// In-memory LRU cache with per-entry TTL.
pub struct MemoryCache {
    entries: RwLock<LruCache<String, CacheEntry>>,
    stats: CacheStats,
}

const DEFAULT_CAPACITY: usize = 100_000;

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("cache capacity must be > 0");
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    async fn lookup(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.write().await;
        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let value = self.lookup(key).await;
        match value {
            Some(_) => self.stats.hits.fetch_add(1, Ordering::Relaxed),
            None => self.stats.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(value) = self.lookup(key).await {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                found.insert(key.clone(), value);
            } else {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.put(key.to_string(), CacheEntry::new(value, ttl));
        Ok(())
    }

    async fn set_many(&self, new_entries: &[(String, Value)], ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        for (key, value) in new_entries {
            entries.put(key.clone(), CacheEntry::new(value.clone(), ttl));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.pop(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::new();
        assert!(cache.get("k").await.unwrap().is_none());

        cache.set("k", json!(1), TTL).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().unwrap(), json!(1));

        cache.delete("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let cache = MemoryCache::new();
        cache.set("k", json!(1), TTL).await.unwrap();
        cache
            .set("k", json!({"value_types": {"load": true}}), TTL)
            .await
            .unwrap();
        let value = cache.get("k").await.unwrap().unwrap();
        assert!(value.get("value_types").is_some());
    }

    #[tokio::test]
    async fn test_get_many_partial() {
        let cache = MemoryCache::new();
        cache.set("a", json!(1), TTL).await.unwrap();
        cache.set("c", json!(1), TTL).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let found = cache.get_many(&keys).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains_key("a"));
        assert!(!found.contains_key("b"));
    }

    #[tokio::test]
    async fn test_set_many() {
        let cache = MemoryCache::new();
        let entries = vec![
            ("x".to_string(), json!(1)),
            ("y".to_string(), json!(1)),
        ];
        cache.set_many(&entries, TTL).await.unwrap();
        assert!(cache.get("x").await.unwrap().is_some());
        assert!(cache.get("y").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::new();
        cache
            .set("short", json!(1), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(cache.get("short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = MemoryCache::with_capacity(2);
        cache.set("a", json!(1), TTL).await.unwrap();
        cache.set("b", json!(1), TTL).await.unwrap();
        cache.set("c", json!(1), TTL).await.unwrap();

        // "a" was least recently used
        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("b").await.unwrap().is_some());
        assert!(cache.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let cache = MemoryCache::new();
        cache.set("k", json!(1), TTL).await.unwrap();
        cache.get("k").await.unwrap();
        cache.get("absent").await.unwrap();

        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
        assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
