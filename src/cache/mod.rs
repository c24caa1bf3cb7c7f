//! Redis caching layer for aggregate listings
//!
//! Listing collaborators read `loads:all` through the cache and repopulate it
//! on a miss. The assignment coordinator only ever deletes that key after a
//! committed mutation.
//!
//! # Example
//!
//! ```rust,ignore
//! use freightline::cache::{CacheConfig, CacheStore, RedisCache, LOADS_ALL_KEY};
//!
//! let config = CacheConfig::from_env()?;
//! let cache = RedisCache::new(&config)?;
//!
//! cache.set(LOADS_ALL_KEY, "[]", config.loads_ttl()).await?;
//! cache.delete(LOADS_ALL_KEY).await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Key holding the cached listing of all loads
pub const LOADS_ALL_KEY: &str = "loads:all";

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Load listing TTL in seconds (default: 60)
    pub loads_ttl_secs: u64,

    /// Key prefix for namespacing, empty for none
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            loads_ttl_secs: 60,
            key_prefix: String::new(),
        }
    }
}

impl CacheConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            pool_size: std::env::var("REDIS_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            loads_ttl_secs: std::env::var("CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            key_prefix: std::env::var("CACHE_KEY_PREFIX").unwrap_or_default(),
        })
    }

    /// TTL for the load listing
    pub fn loads_ttl(&self) -> Duration {
        Duration::from_secs(self.loads_ttl_secs)
    }
}

/// Key/value cache with per-entry TTL
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value, `None` on miss or expiry
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value that expires after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete a key, returning how many entries were removed
    async fn delete(&self, key: &str) -> Result<u64>;
}

/// Shared handle used by the coordinator and listing paths
pub type SharedCache = Arc<dyn CacheStore>;

/// Read a JSON value from the cache
pub async fn get_json<T: DeserializeOwned>(cache: &dyn CacheStore, key: &str) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(raw) => {
            let decoded = serde_json::from_str(&raw).context("Failed to deserialize value")?;
            Ok(Some(decoded))
        }
        None => Ok(None),
    }
}

/// Write a JSON value to the cache
pub async fn set_json<T: Serialize>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let raw = serde_json::to_string(value).context("Failed to serialize value")?;
    cache.set(key, &raw, ttl).await
}

/// Redis cache client
pub struct RedisCache {
    /// Connection pool
    pool: Pool,
    /// Configuration
    config: CacheConfig,
}

impl RedisCache {
    /// Create a cache instance; connections are opened on first use
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let pool_config = PoolConfig::from_url(&config.url);
        let pool = pool_config
            .builder()
            .map_err(|e| anyhow::anyhow!("Failed to create pool builder: {e}"))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .context("Failed to create Redis connection pool")?;

        Ok(Self {
            pool,
            config: config.clone(),
        })
    }

    /// Create a cache instance and verify the server answers
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let cache = Self::new(config)?;
        cache
            .health_check()
            .await
            .context("Failed to ping Redis")?;
        tracing::info!(url = %config.url, "Connected to Redis cache");
        Ok(cache)
    }

    fn key(&self, key: &str) -> String {
        if self.config.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.config.key_prefix, key)
        }
    }

    /// Check if cache is healthy
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let result: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(result == "PONG")
    }

    /// Get config reference
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;
        let value: Option<String> = conn
            .get(self.key(key))
            .await
            .context("Failed to get from cache")?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;
        conn.set_ex::<_, _, ()>(self.key(key), value, ttl.as_secs().max(1))
            .await
            .context("Failed to set cache")?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;
        let removed: u64 = conn
            .del(self.key(key))
            .await
            .context("Failed to delete key")?;
        tracing::debug!(key = %key, removed, "Invalidated cache entry");
        Ok(removed)
    }
}

// ============================================================================
// In-memory cache
// ============================================================================

/// Process-local cache for tests and `--in-memory` runs
#[derive(Default)]
pub struct MemoryCache {
    /// Value and expiry; `None` never expires
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
    deleted: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Keys passed to successful `delete` calls, in order
    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether a live entry exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .is_some_and(|(_, expires)| is_live(*expires))
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("cache unavailable");
        }
        Ok(())
    }
}

fn is_live(expires: Option<Instant>) -> bool {
    expires.map_or(true, |at| at > Instant::now())
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((value, expires)) if is_live(*expires) => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check()?;
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (value.to_string(), Instant::now().checked_add(ttl)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        self.check()?;
        let removed = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some();
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.to_string());
        Ok(u64::from(removed))
    }
}
