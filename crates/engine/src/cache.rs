//! Injected TTL cache for fetched market data

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use persistence::repository::CacheRepository;
use persistence::Database;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Key/value store with per-entry expiry. Failures degrade to cache misses.
#[async_trait]
pub trait ScanCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    async fn clear(&self);
}

/// Read and decode a JSON entry
pub async fn get_json<T: DeserializeOwned>(cache: &dyn ScanCache, key: &str) -> Option<T> {
    let raw = cache.get(key).await?;
    match serde_json::from_str(&raw) {
        Ok(value) => {
            debug!(key, "cache hit");
            Some(value)
        }
        Err(e) => {
            warn!(key, error = %e, "Discarding undecodable cache entry");
            None
        }
    }
}

/// Encode and store a JSON entry
pub async fn set_json<T: Serialize + ?Sized>(cache: &dyn ScanCache, key: &str, value: &T, ttl: Duration) {
    match serde_json::to_string(value) {
        Ok(raw) => cache.set(key, raw, ttl).await,
        Err(e) => warn!(key, error = %e, "Failed to encode cache entry"),
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl ScanCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires)) if *expires > Instant::now() => return Some(value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // a set may have landed between the two locks; only drop a stale entry
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                debug!(key, "cache entry expired");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let expires = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value, expires));
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

// ============================================================================
// SQLite-backed
// ============================================================================

/// Cache persisted in the `cache_entries` table so restarts keep warm data
pub struct SqliteScanCache {
    db: Database,
}

impl SqliteScanCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Drop expired rows
    pub async fn purge_expired(&self) -> u64 {
        match CacheRepository::new(self.db.pool()).purge_expired().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Failed to purge expired cache entries");
                0
            }
        }
    }
}

#[async_trait]
impl ScanCache for SqliteScanCache {
    async fn get(&self, key: &str) -> Option<String> {
        match CacheRepository::new(self.db.pool()).get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX / 2);
        if let Err(e) = CacheRepository::new(self.db.pool()).set(key, &value, ttl_ms).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    async fn clear(&self) {
        match CacheRepository::new(self.db.pool()).clear().await {
            Ok(n) => debug!(removed = n, "Cache cleared"),
            Err(e) => warn!(error = %e, "Cache clear failed"),
        }
    }
}
