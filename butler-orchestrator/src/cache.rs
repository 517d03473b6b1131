//! Snapshot cache
//!
//! Short-lived key-value store with per-entry TTL. Holds instance snapshots and
//! round-robin cursors; it is never authoritative, so every miss falls back to
//! the mirror.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use uuid::Uuid;

/// Key of the cached snapshot of one instance
pub fn instance_key(id: Uuid) -> String {
    format!("butler:instance:{id}")
}

/// Key of the round-robin cursor of one cluster
pub fn round_robin_key(cluster: Option<&str>) -> String {
    format!("butler:balancer:{}:index", cluster.unwrap_or("default"))
}

/// Key-value cache with TTL
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String, ttl: Duration);

    async fn delete(&self, key: &str);
}

/// Read a JSON value; undecodable entries read as a miss
pub async fn get_json<T: DeserializeOwned>(cache: &dyn SnapshotCache, key: &str) -> Option<T> {
    let raw = cache.get(key).await?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Discarding undecodable cache entry {}: {}", key, e);
            cache.delete(key).await;
            None
        }
    }
}

/// Store a value as JSON
pub async fn set_json<T: Serialize + Sync>(
    cache: &dyn SnapshotCache,
    key: &str,
    value: &T,
    ttl: Duration,
) {
    match serde_json::to_string(value) {
        Ok(raw) => cache.set(key, raw, ttl).await,
        Err(e) => tracing::warn!("Failed to encode cache entry {}: {}", key, e),
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-process cache backed by a `DashMap`
///
/// Expired entries are dropped lazily on read and by [`MemoryCache::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SnapshotCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        if let Some(entry) = self.entries.get(key) {
            if Instant::now() < entry.expires_at {
                return Some(entry.value.clone());
            }
        }
        self.entries
            .remove_if(key, |_, entry| Instant::now() >= entry.expires_at);
        None
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}
