//! Cache tiers for resolved pricing factors.
//!
//! Values are opaque JSON strings; encoding and decoding happen in the
//! resolver layer so a tier never needs to know factor types.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod local;
pub mod remote;

pub use local::LocalCache;
pub use remote::RedisCache;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Key absent or expired. Not a failure.
    #[error("cache miss")]
    Miss,
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// One cache tier. Multi-key calls return only the keys that were found.
#[async_trait]
pub trait CacheTier: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<String, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>, CacheError>;

    async fn set_many(
        &self,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), CacheError>;
}
