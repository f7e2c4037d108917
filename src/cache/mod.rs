//! Cache layer
//!
//! Services cache read-mostly records and list pages through [`Cache`]:
//! - in-memory (moka), the default for a single instance
//! - Redis, behind the `redis-cache` feature, for shared deployments
//!
//! The database stays the source of truth. Callers treat every cache
//! failure as a miss, see [`get_or_log`] and [`set_or_log`].

pub mod keys;
pub mod memory;
#[cfg(feature = "redis-cache")]
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheConfig, CacheDriver};

pub use keys::CacheKeyBuilder;
pub use memory::MemoryCache;
#[cfg(feature = "redis-cache")]
pub use redis::RedisCache;

/// Cache operations shared by every backend.
///
/// The generic methods make this trait unusable as `dyn CacheLayer`;
/// [`Cache`] provides the runtime dispatch instead.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every key matching a glob pattern (`*` and `?`)
    async fn delete_pattern(&self, pattern: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

#[derive(Debug)]
pub enum Cache {
    Memory(MemoryCache),
    #[cfg(feature = "redis-cache")]
    Redis(RedisCache),
}

impl Cache {
    /// Default entry lifetime configured for this backend
    pub fn default_ttl(&self) -> Duration {
        match self {
            Cache::Memory(cache) => cache.default_ttl(),
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.default_ttl(),
        }
    }
}

#[async_trait]
impl CacheLayer for Cache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self {
            Cache::Memory(cache) => cache.get(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.get(key).await,
        }
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.set(key, value, ttl).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.delete(key).await,
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete_pattern(pattern).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.delete_pattern(pattern).await,
        }
    }

    async fn clear(&self) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.clear().await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.clear().await,
        }
    }
}

/// Read a cached value, logging and swallowing backend errors.
pub async fn get_or_log<T: DeserializeOwned + Send>(cache: &Cache, key: &str) -> Option<T> {
    match cache.get(key).await {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(key, error = %e, "Cache read failed");
            None
        }
    }
}

/// Store a value, logging and swallowing backend errors.
pub async fn set_or_log<T: Serialize + Send + Sync>(cache: &Cache, key: &str, value: &T, ttl: Duration) {
    if let Err(e) = cache.set(key, value, ttl).await {
        tracing::warn!(key, error = %e, "Cache write failed");
    }
}

/// Delete keys, logging and swallowing backend errors.
pub async fn invalidate(cache: &Cache, keys: &[&str]) {
    for key in keys {
        let result = if key.contains('*') || key.contains('?') {
            cache.delete_pattern(key).await
        } else {
            cache.delete(key).await
        };
        if let Err(e) = result {
            tracing::warn!(key, error = %e, "Cache invalidation failed");
        }
    }
}

/// Create the cache backend selected by `config.driver`.
pub async fn create_cache(config: &CacheConfig) -> Result<Arc<Cache>> {
    let ttl = Duration::from_secs(config.ttl_seconds);

    match config.driver {
        CacheDriver::Memory => {
            let cache = MemoryCache::with_capacity_and_ttl(10_000, ttl);
            Ok(Arc::new(Cache::Memory(cache)))
        }
        CacheDriver::Redis => {
            #[cfg(feature = "redis-cache")]
            {
                let redis_url = config.redis_url.as_ref().ok_or_else(|| {
                    anyhow::anyhow!(
                        "Redis URL is required when using the Redis cache driver. \
                         Set 'cache.redis_url' or the REDIS_URL environment variable."
                    )
                })?;

                let cache = RedisCache::with_ttl(redis_url, ttl).await?;
                Ok(Arc::new(Cache::Redis(cache)))
            }

            #[cfg(not(feature = "redis-cache"))]
            {
                anyhow::bail!(
                    "Redis cache driver is configured but the 'redis-cache' feature is not enabled. \
                     Build with `--features redis-cache` or use the 'memory' driver."
                )
            }
        }
    }
}
