//! Redis cache backend
//!
//! Values are JSON strings written with `SET EX`. Pattern deletion walks
//! the keyspace with `SCAN` so large databases are never blocked by `KEYS`.

use super::CacheLayer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Keys requested per SCAN round trip
const SCAN_COUNT: usize = 100;

pub struct RedisCache {
    connection: MultiplexedConnection,
    default_ttl: Duration,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::with_ttl(redis_url, DEFAULT_TTL).await
    }

    pub async fn with_ttl(redis_url: &str, default_ttl: Duration) -> Result<Self> {
        let client = Client::open(redis_url).context("Failed to create Redis client")?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;

        tracing::info!("Connected to Redis cache");
        Ok(Self {
            connection,
            default_ttl,
        })
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

#[async_trait]
impl CacheLayer for RedisCache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(key).await.context("Failed to read from Redis")?;

        raw.map(|json| serde_json::from_str(&json).context("Failed to deserialize cached value"))
            .transpose()
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(value).context("Failed to serialize cache value")?;

        // Redis expiry has one-second resolution
        let seconds = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(key, json, seconds)
            .await
            .context("Failed to write to Redis")?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(key).await.context("Failed to delete key from Redis")?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .context("Failed to scan Redis keys")?;

            if !keys.is_empty() {
                let _: () = conn
                    .del(&keys)
                    .await
                    .context("Failed to delete keys from Redis")?;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Flushes the whole logical database selected by the URL
    async fn clear(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .context("Failed to flush Redis database")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_set_get_delete() {
        let cache = RedisCache::new(&redis_url()).await.unwrap();

        cache
            .set("test:user:1", &"alice".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        let value: Option<String> = cache.get("test:user:1").await.unwrap();
        assert_eq!(value, Some("alice".to_string()));

        cache.delete("test:user:1").await.unwrap();
        let value: Option<String> = cache.get("test:user:1").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_delete_pattern() {
        let cache = RedisCache::new(&redis_url()).await.unwrap();
        let ttl = Duration::from_secs(60);

        cache.set("test:posts:list:1:10", &1, ttl).await.unwrap();
        cache.set("test:posts:list:2:10", &2, ttl).await.unwrap();
        cache.set("test:post:1", &3, ttl).await.unwrap();

        cache.delete_pattern("test:posts:list:*").await.unwrap();

        assert_eq!(cache.get::<i32>("test:posts:list:1:10").await.unwrap(), None);
        assert_eq!(cache.get::<i32>("test:posts:list:2:10").await.unwrap(), None);
        assert_eq!(cache.get::<i32>("test:post:1").await.unwrap(), Some(3));

        cache.delete("test:post:1").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_ttl_expiration() {
        let cache = RedisCache::new(&redis_url()).await.unwrap();

        cache
            .set("test:ttl", &"v".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let value: Option<String> = cache.get("test:ttl").await.unwrap();
        assert_eq!(value, None);
    }
}
