//! Concrete factor sources over downstream services and the database.

use super::{complete, FactorMap, FactorSource, MerchantShopKey};
use crate::datasource::{
    CommissionRates, ItemInfo, ItemService, MerchantService, ShopInfo, ShopService,
};
use crate::db::{ProfitRateLimit, Repository};
use crate::domain::numeric::to_real_ratio;
use crate::domain::{Decimal, ItemId, MerchantId, RegionPair, ShopId};
use crate::error::PricingError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Every key fails with the same error.
fn fail_all<K: super::FactorKey, V>(keys: &[K], err: PricingError) -> FactorMap<K, V> {
    keys.iter().map(|k| (k.clone(), Err(err.clone()))).collect()
}

#[derive(Debug, Clone)]
pub struct ShopInfoSource {
    shops: Arc<dyn ShopService>,
}

impl ShopInfoSource {
    pub fn new(shops: Arc<dyn ShopService>) -> Self {
        Self { shops }
    }
}

#[async_trait]
impl FactorSource<ShopId, ShopInfo> for ShopInfoSource {
    async fn fetch_many(&self, keys: &[ShopId]) -> FactorMap<ShopId, ShopInfo> {
        match self.shops.get_shops(keys).await {
            Ok(found) => complete(keys, found, "shop"),
            Err(e) => {
                warn!(count = keys.len(), error = %e, "shop lookup failed");
                fail_all(keys, e.into())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ItemInfoSource {
    items: Arc<dyn ItemService>,
}

impl ItemInfoSource {
    pub fn new(items: Arc<dyn ItemService>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl FactorSource<ItemId, ItemInfo> for ItemInfoSource {
    async fn fetch_many(&self, keys: &[ItemId]) -> FactorMap<ItemId, ItemInfo> {
        match self.items.get_items(keys).await {
            Ok(found) => complete(keys, found, "item"),
            Err(e) => {
                warn!(count = keys.len(), error = %e, "item lookup failed");
                fail_all(keys, e.into())
            }
        }
    }
}

/// Commission, transaction and service fee rates per shop.
#[derive(Debug, Clone)]
pub struct CommissionSource {
    merchants: Arc<dyn MerchantService>,
}

impl CommissionSource {
    pub fn new(merchants: Arc<dyn MerchantService>) -> Self {
        Self { merchants }
    }
}

#[async_trait]
impl FactorSource<ShopId, CommissionRates> for CommissionSource {
    async fn fetch_many(&self, keys: &[ShopId]) -> FactorMap<ShopId, CommissionRates> {
        match self.merchants.get_commission_rates(keys).await {
            Ok(found) => complete(keys, found, "commission rates for shop"),
            Err(e) => {
                warn!(count = keys.len(), error = %e, "commission lookup failed");
                fail_all(keys, e.into())
            }
        }
    }
}

/// Real exchange rate keyed by (from region, to region).
#[derive(Debug, Clone)]
pub struct ExchangeRateSource {
    repo: Arc<Repository>,
}

impl ExchangeRateSource {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl FactorSource<RegionPair, Decimal> for ExchangeRateSource {
    async fn fetch_many(&self, keys: &[RegionPair]) -> FactorMap<RegionPair, Decimal> {
        let mut out = HashMap::with_capacity(keys.len());
        for pair in keys {
            let outcome = match self.repo.get_exchange_rate(&pair.primary, &pair.affiliate).await {
                Ok(Some(rec)) => Ok(to_real_ratio(rec.rate)),
                Ok(None) => Err(PricingError::NotFound(format!("exchange rate {}", pair))),
                Err(e) => Err(e.into()),
            };
            out.insert(pair.clone(), outcome);
        }
        out
    }
}

/// Inflated profit rate per (merchant, shop).
#[derive(Debug, Clone)]
pub struct ProfitRateSource {
    repo: Arc<Repository>,
}

impl ProfitRateSource {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl FactorSource<MerchantShopKey, i64> for ProfitRateSource {
    async fn fetch_many(&self, keys: &[MerchantShopKey]) -> FactorMap<MerchantShopKey, i64> {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            let outcome = match self.repo.get_profit_rate(key.merchant_id, key.shop_id).await {
                Ok(Some(rate)) => Ok(rate),
                Ok(None) => Err(PricingError::NotFound(format!(
                    "profit rate for merchant {} shop {}",
                    key.merchant_id, key.shop_id
                ))),
                Err(e) => Err(e.into()),
            };
            out.insert(*key, outcome);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct ProfitRateLimitSource {
    repo: Arc<Repository>,
}

impl ProfitRateLimitSource {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl FactorSource<MerchantId, ProfitRateLimit> for ProfitRateLimitSource {
    async fn fetch_many(&self, keys: &[MerchantId]) -> FactorMap<MerchantId, ProfitRateLimit> {
        let mut out = HashMap::with_capacity(keys.len());
        for merchant_id in keys {
            let outcome = match self.repo.get_profit_rate_limit(*merchant_id).await {
                Ok(Some(limit)) => Ok(limit),
                Ok(None) => Err(PricingError::NotFound(format!(
                    "profit rate limit for merchant {}",
                    merchant_id
                ))),
                Err(e) => Err(e.into()),
            };
            out.insert(*merchant_id, outcome);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockServices;
    use crate::db::init_db;
    use crate::domain::Region;
    use tempfile::TempDir;

    async fn setup_repo() -> (Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db").to_string_lossy().to_string();
        let pool = init_db(&db_path).await.unwrap();
        (Arc::new(Repository::new(pool)), temp_dir)
    }

    #[tokio::test]
    async fn test_shop_source_marks_unknown_shops_not_found() {
        let mock = MockServices::new().with_shop(ShopInfo::new(1, Region::new("MY")));
        let source = ShopInfoSource::new(Arc::new(mock));
        let out = source.fetch_many(&[1, 2]).await;
        assert_eq!(out[&1].as_ref().unwrap().region, Region::new("MY"));
        assert!(matches!(out[&2], Err(PricingError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_exchange_rate_source_deflates() {
        let (repo, _temp) = setup_repo().await;
        let cn = Region::new("CN");
        let my = Region::new("MY");
        repo.upsert_exchange_rate(&cn, &my, 65_000).await.unwrap();

        let source = ExchangeRateSource::new(repo);
        let found = RegionPair::new(cn.clone(), my.clone());
        let missing = RegionPair::new(my, cn);
        let out = source.fetch_many(&[found.clone(), missing.clone()]).await;
        assert_eq!(out[&found], Ok(Decimal::from_str_canonical("0.65").unwrap()));
        assert!(matches!(out[&missing], Err(PricingError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_profit_sources() {
        let (repo, _temp) = setup_repo().await;
        repo.upsert_profit_rate(5, 50, 11_000).await.unwrap();
        let rates = ProfitRateSource::new(repo.clone());
        let key = MerchantShopKey::new(5, 50);
        let out = rates.fetch_many(&[key, MerchantShopKey::new(5, 51)]).await;
        assert_eq!(out[&key], Ok(11_000));
        assert_eq!(out.len(), 2);

        let limits = ProfitRateLimitSource::new(repo);
        assert!(matches!(
            limits.fetch_many(&[5]).await[&5],
            Err(PricingError::NotFound(_))
        ));
    }
}
