//! In-process cache tier with per-entry TTL and a capacity bound.

use super::{CacheError, CacheTier};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const EVICTION_DIVISOR: usize = 10;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug)]
pub struct LocalCache {
    entries: DashMap<String, Entry>,
    capacity: usize,
}

impl LocalCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, key: &str, now: Instant) -> Option<String> {
        let live = self
            .entries
            .get(key)
            .map(|e| e.is_live(now).then(|| e.value.clone()))?;
        if live.is_none() {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
        }
        live
    }

    fn insert(&self, key: String, value: String, ttl: Duration, now: Instant) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.make_room(now);
        }
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    /// Drop expired entries; if still full, evict the tenth of the capacity
    /// closest to expiry so the next inserts skip the scan.
    fn make_room(&self, now: Instant) {
        self.entries.retain(|_, e| e.is_live(now));
        let len = self.entries.len();
        if len < self.capacity {
            return;
        }
        let keep = self.capacity - self.eviction_batch();
        let mut by_expiry: Vec<(Instant, String)> = self
            .entries
            .iter()
            .map(|e| (e.value().expires_at, e.key().clone()))
            .collect();
        let evict = len - keep;
        if evict < by_expiry.len() {
            by_expiry.select_nth_unstable_by_key(evict, |(at, _)| *at);
            by_expiry.truncate(evict);
        }
        debug!(evicted = by_expiry.len(), "local cache full, evicting");
        for (_, key) in by_expiry {
            self.entries.remove(&key);
        }
    }

    fn eviction_batch(&self) -> usize {
        (self.capacity / EVICTION_DIVISOR).max(1)
    }
}

#[async_trait]
impl CacheTier for LocalCache {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<String, CacheError> {
        self.lookup(key, Instant::now()).ok_or(CacheError::Miss)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.insert(key.to_string(), value, ttl, Instant::now());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>, CacheError> {
        let now = Instant::now();
        Ok(keys
            .iter()
            .filter_map(|k| self.lookup(k, now).map(|v| (k.clone(), v)))
            .collect())
    }

    async fn set_many(
        &self,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        for (key, value) in entries {
            self.insert(key, value, ttl, now);
        }
        Ok(())
    }
}
