//! Factor resolution.
//!
//! Every pricing factor is fetched through a [`FactorSource`]: a bulk,
//! per-key lookup that never fails as a whole. Sources are decorated with
//! [`CachedSource`] layers (local tier, then remote tier, then the real
//! source). Program resolvers gather all factors a batch needs into a
//! write-once aggregate that workers then read without further I/O.

use crate::cache::{CacheError, CacheTier};
use crate::domain::{MerchantId, RegionPair, ShopId};
use crate::error::PricingError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub mod cb_sip;
pub mod cbsc;
pub mod hidden_fee;
pub mod local_sip;
pub mod sources;

pub use cb_sip::{CalcFactorDataForCbSip, CbSipResolver};
pub use cbsc::{CalcFactorDataForMtskuAndMpsku, CbscResolver, SetPriceFactorEntry};
pub use hidden_fee::{HiddenFeeKey, LogisticsHiddenFeeSource};
pub use local_sip::{CalcFactorDataForLocalSip, LocalSipResolver};

/// Per-key outcome of a bulk lookup.
pub type FactorMap<K, V> = HashMap<K, Result<V, PricingError>>;

/// A value usable as a factor lookup key.
pub trait FactorKey: Clone + Eq + Hash + Send + Sync + fmt::Debug + 'static {
    /// Stable string form used in cache keys.
    fn cache_key(&self) -> String;
}

impl FactorKey for u64 {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl FactorKey for RegionPair {
    fn cache_key(&self) -> String {
        format!("{}:{}", self.primary, self.affiliate)
    }
}

/// (merchant, shop) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MerchantShopKey {
    pub merchant_id: MerchantId,
    pub shop_id: ShopId,
}

impl MerchantShopKey {
    pub fn new(merchant_id: MerchantId, shop_id: ShopId) -> Self {
        Self {
            merchant_id,
            shop_id,
        }
    }
}

impl FactorKey for MerchantShopKey {
    fn cache_key(&self) -> String {
        format!("{}:{}", self.merchant_id, self.shop_id)
    }
}

/// Bulk lookup of one kind of factor.
///
/// The answer holds an entry for every requested key; lookups that found
/// nothing are `Err(PricingError::NotFound)`.
#[async_trait]
pub trait FactorSource<K, V>: Send + Sync + fmt::Debug
where
    K: FactorKey,
    V: Send + 'static,
{
    async fn fetch_many(&self, keys: &[K]) -> FactorMap<K, V>;

    /// Drop any cached copy of `keys`.
    async fn invalidate(&self, _keys: &[K]) {}
}

/// Keys in first-seen order, without duplicates.
pub(crate) fn dedup_keys<K: Clone + Eq + Hash>(keys: impl IntoIterator<Item = K>) -> Vec<K> {
    let mut seen = HashSet::new();
    keys.into_iter().filter(|k| seen.insert(k.clone())).collect()
}

/// Fill in `NotFound` for every requested key the answer lacks.
pub(crate) fn complete<K: FactorKey, V>(
    keys: &[K],
    mut found: HashMap<K, V>,
    what: &str,
) -> FactorMap<K, V> {
    keys.iter()
        .map(|k| {
            let v = found
                .remove(k)
                .ok_or_else(|| PricingError::NotFound(format!("{} {}", what, k.cache_key())));
            (k.clone(), v)
        })
        .collect()
}

/// Look up `key` in a factor map, cloning the outcome.
pub(crate) fn lookup<K: FactorKey, V: Clone>(
    map: &FactorMap<K, V>,
    key: &K,
    what: &str,
) -> Result<V, PricingError> {
    map.get(key).cloned().unwrap_or_else(|| {
        Err(PricingError::Internal(format!(
            "{} {} was not resolved",
            what,
            key.cache_key()
        )))
    })
}

/// Read-through cache in front of another source.
pub struct CachedSource<K: FactorKey, V: Send + 'static> {
    inner: Arc<dyn FactorSource<K, V>>,
    tier: Arc<dyn CacheTier>,
    namespace: &'static str,
    ttl: Duration,
}

impl<K: FactorKey, V: Send + 'static> fmt::Debug for CachedSource<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedSource")
            .field("namespace", &self.namespace)
            .field("tier", &self.tier.name())
            .field("ttl", &self.ttl)
            .field("inner", &self.inner)
            .finish()
    }
}

impl<K, V> CachedSource<K, V>
where
    K: FactorKey,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        inner: Arc<dyn FactorSource<K, V>>,
        tier: Arc<dyn CacheTier>,
        namespace: &'static str,
        ttl: Duration,
    ) -> Self {
        Self {
            inner,
            tier,
            namespace,
            ttl,
        }
    }

    fn tier_key(&self, key: &K) -> String {
        format!("{}:{}", self.namespace, key.cache_key())
    }

    fn write_back(&self, entries: Vec<(String, String)>) {
        if entries.is_empty() {
            return;
        }
        let tier = self.tier.clone();
        let ttl = self.ttl;
        let namespace = self.namespace;
        tokio::spawn(async move {
            let count = entries.len();
            if let Err(e) = tier.set_many(entries, ttl).await {
                warn!(namespace, tier = tier.name(), count, error = %e, "cache write-back failed");
            }
        });
    }
}

#[async_trait]
impl<K, V> FactorSource<K, V> for CachedSource<K, V>
where
    K: FactorKey,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn fetch_many(&self, keys: &[K]) -> FactorMap<K, V> {
        let keys = dedup_keys(keys.iter().cloned());
        let tier_keys: Vec<String> = keys.iter().map(|k| self.tier_key(k)).collect();

        let cached = match self.tier.get_many(&tier_keys).await {
            Ok(found) => found,
            Err(CacheError::Miss) => HashMap::new(),
            Err(e) => {
                warn!(namespace = self.namespace, tier = self.tier.name(), error = %e,
                    "cache read failed, falling through");
                HashMap::new()
            }
        };

        let mut out = HashMap::with_capacity(keys.len());
        let mut missed = Vec::new();
        for (key, tier_key) in keys.into_iter().zip(tier_keys) {
            match cached.get(&tier_key) {
                Some(raw) => match serde_json::from_str::<V>(raw) {
                    Ok(v) => {
                        out.insert(key, Ok(v));
                    }
                    Err(e) => {
                        let err = PricingError::from(e);
                        warn!(namespace = self.namespace, key = %tier_key, error = %err,
                            "undecodable cache entry, refetching");
                        missed.push((key, tier_key));
                    }
                },
                None => missed.push((key, tier_key)),
            }
        }
        debug!(
            namespace = self.namespace,
            tier = self.tier.name(),
            hits = out.len(),
            misses = missed.len(),
            "factor cache lookup"
        );
        if missed.is_empty() {
            return out;
        }

        let missed_keys: Vec<K> = missed.iter().map(|(k, _)| k.clone()).collect();
        let mut fetched = self.inner.fetch_many(&missed_keys).await;

        let mut write_back = Vec::new();
        for (key, tier_key) in missed {
            let outcome = fetched.remove(&key).unwrap_or_else(|| {
                Err(PricingError::NotFound(format!(
                    "{} {}",
                    self.namespace,
                    key.cache_key()
                )))
            });
            if let Ok(v) = &outcome {
                match serde_json::to_string(v) {
                    Ok(raw) => write_back.push((tier_key, raw)),
                    Err(e) => warn!(namespace = self.namespace, error = %e, "cannot encode factor"),
                }
            }
            out.insert(key, outcome);
        }
        self.write_back(write_back);
        out
    }

    async fn invalidate(&self, keys: &[K]) {
        for key in keys {
            let tier_key = self.tier_key(key);
            if let Err(e) = self.tier.delete(&tier_key).await {
                warn!(namespace = self.namespace, key = %tier_key, error = %e,
                    "cache invalidation failed");
            }
        }
        self.inner.invalidate(keys).await;
    }
}

/// One cache tier and the TTL of entries written to it.
#[derive(Debug, Clone)]
pub struct TierSpec {
    pub tier: Arc<dyn CacheTier>,
    pub ttl: Duration,
}

/// Cache tiers in lookup order, nearest first.
#[derive(Debug, Clone, Default)]
pub struct CacheLayers {
    tiers: Vec<TierSpec>,
}

impl CacheLayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tier(mut self, tier: Arc<dyn CacheTier>, ttl: Duration) -> Self {
        self.tiers.push(TierSpec { tier, ttl });
        self
    }

    /// Wrap `source` so lookups go through every tier before reaching it.
    pub fn wrap<K, V>(
        &self,
        source: Arc<dyn FactorSource<K, V>>,
        namespace: &'static str,
    ) -> Arc<dyn FactorSource<K, V>>
    where
        K: FactorKey,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.tiers.iter().rev().fold(source, |inner, spec| {
            Arc::new(CachedSource::new(inner, spec.tier.clone(), namespace, spec.ttl))
                as Arc<dyn FactorSource<K, V>>
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Source answering from a fixed map and recording the keys it was asked for.
    #[derive(Debug)]
    pub struct MapSource<K, V> {
        pub values: HashMap<K, V>,
        pub requested: Mutex<Vec<Vec<K>>>,
        pub invalidations: AtomicUsize,
    }

    impl<K: FactorKey, V> MapSource<K, V> {
        pub fn new(values: HashMap<K, V>) -> Self {
            Self {
                values,
                requested: Mutex::new(Vec::new()),
                invalidations: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> Vec<Vec<K>> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<K, V> FactorSource<K, V> for MapSource<K, V>
    where
        K: FactorKey,
        V: Clone + Send + Sync + fmt::Debug + 'static,
    {
        async fn fetch_many(&self, keys: &[K]) -> FactorMap<K, V> {
            self.requested.lock().unwrap().push(keys.to_vec());
            let found = keys
                .iter()
                .filter_map(|k| self.values.get(k).map(|v| (k.clone(), v.clone())))
                .collect();
            complete(keys, found, "value")
        }

        async fn invalidate(&self, _keys: &[K]) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }
}
