//! Shared remote cache tier backed by Redis.

use super::{CacheError, CacheTier};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

pub struct RedisCache {
    connection_manager: ConnectionManager,
    prefix: String,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect to `redis_url`. Every key is stored under `prefix`.
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)?;
        let connection_manager = ConnectionManager::new(client).await?;
        Ok(Self {
            connection_manager,
            prefix: prefix.to_string(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        prefixed(&self.prefix, key)
    }
}

fn prefixed(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}:{}", prefix, key)
    }
}

/// Redis rejects `SETEX` with a zero TTL.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheTier for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<String, CacheError> {
        let mut conn = self.connection_manager.clone();
        let result: Option<String> = conn.get(self.full_key(key)).await?;
        match result {
            Some(data) => {
                debug!(key, "redis hit");
                Ok(data)
            }
            None => Err(CacheError::Miss),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        let _: () = conn.set_ex(self.full_key(key), value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        let _: () = conn.del(self.full_key(key)).await?;
        debug!(key, "redis key deleted");
        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>, CacheError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.connection_manager.clone();
        let full: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&full)
            .query_async(&mut conn)
            .await?;
        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(k, v)| v.map(|v| (k.clone(), v)))
            .collect())
    }

    async fn set_many(
        &self,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection_manager.clone();
        let secs = ttl_secs(ttl);
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            pipe.set_ex(self.full_key(&key), value, secs).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
