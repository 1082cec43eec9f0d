//! CB SIP factor gathering.

use super::{dedup_keys, lookup, FactorMap, FactorSource};
use crate::datasource::{ItemInfo, ShopInfo};
use crate::domain::numeric::{db_weight_to_gram, to_db_price, to_real_price};
use crate::domain::{CbSipPriceQuery, Decimal, ItemId, PricingSnapshot, RegionPair, ShopId};
use crate::engine::{cb_sip_affiliate_price, CbSipPriceInput};
use crate::error::PricingError;
use crate::ratetable::HiddenFeeLookup;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CbSipResolver {
    shops: Arc<dyn FactorSource<ShopId, ShopInfo>>,
    items: Arc<dyn FactorSource<ItemId, ItemInfo>>,
    exchange_rates: Arc<dyn FactorSource<RegionPair, Decimal>>,
}

impl CbSipResolver {
    pub fn new(
        shops: Arc<dyn FactorSource<ShopId, ShopInfo>>,
        items: Arc<dyn FactorSource<ItemId, ItemInfo>>,
        exchange_rates: Arc<dyn FactorSource<RegionPair, Decimal>>,
    ) -> Self {
        Self {
            shops,
            items,
            exchange_rates,
        }
    }

    pub async fn build(
        &self,
        snapshot: &PricingSnapshot,
        queries: &[CbSipPriceQuery],
    ) -> CalcFactorDataForCbSip {
        let shop_ids = dedup_keys(queries.iter().map(|q| q.shop_id));
        let item_ids = dedup_keys(queries.iter().map(|q| q.item_id));
        let pairs = dedup_keys(
            queries
                .iter()
                .map(|q| RegionPair::new(q.primary_region.clone(), q.affiliate_region.clone())),
        );

        let (shops, items, mut exchange_rates) = tokio::join!(
            self.shops.fetch_many(&shop_ids),
            self.items.fetch_many(&item_ids),
            self.exchange_rates.fetch_many(&pairs),
        );

        // A pair without a stored rate falls back to its price config.
        for (pair, rate) in exchange_rates.iter_mut() {
            if let Err(PricingError::NotFound(_)) = rate {
                if let Some(cfg) = snapshot.price_config(&pair.primary, &pair.affiliate) {
                    debug!(pair = %pair, "exchange rate from price config");
                    *rate = Ok(cfg.effective_exchange_rate());
                }
            }
        }

        let hidden_prices = queries
            .iter()
            .map(|q| (q.query_id, cascade_hidden_price(snapshot, q, &shops, &items)))
            .collect();

        CalcFactorDataForCbSip {
            exchange_rates,
            hidden_prices,
        }
    }
}

fn cascade_hidden_price(
    snapshot: &PricingSnapshot,
    query: &CbSipPriceQuery,
    shops: &FactorMap<ShopId, ShopInfo>,
    items: &FactorMap<ItemId, ItemInfo>,
) -> Result<Decimal, PricingError> {
    let shop = lookup(shops, &query.shop_id, "shop")?;
    let item = lookup(items, &query.item_id, "item")?;
    let resolved = snapshot.rate_tables().resolve(&HiddenFeeLookup {
        item_cfg: item.rate_table_cfg.as_ref(),
        shop_cfg: shop.rate_table_cfg.as_ref(),
        merchant_region: shop.merchant_region.as_ref(),
        primary_region: &query.primary_region,
        affiliate_region: &query.affiliate_region,
        weight_grams: db_weight_to_gram(query.weight),
    });
    resolved?.map(|r| r.fee).ok_or_else(|| {
        PricingError::NotFound(format!(
            "hidden fee rate table for item {} {}->{}",
            query.item_id, query.primary_region, query.affiliate_region
        ))
    })
}

/// Factors resolved for one CB SIP batch.
#[derive(Debug, Clone, Default)]
pub struct CalcFactorDataForCbSip {
    exchange_rates: FactorMap<RegionPair, Decimal>,
    /// Keyed by query id.
    hidden_prices: HashMap<u64, Result<Decimal, PricingError>>,
}

impl CalcFactorDataForCbSip {
    pub fn price(
        &self,
        query: &CbSipPriceQuery,
        snapshot: &PricingSnapshot,
    ) -> Result<i64, PricingError> {
        let pair = RegionPair::new(query.primary_region.clone(), query.affiliate_region.clone());
        let exchange_rate = lookup(&self.exchange_rates, &pair, "exchange rate")?;
        let hidden_price = lookup(&self.hidden_prices, &query.query_id, "hidden price")?;

        let price = cb_sip_affiliate_price(&CbSipPriceInput {
            primary_price: to_real_price(query.primary_price),
            price_ratio: query.price_ratio,
            exchange_rate,
            hidden_price,
            ratio: query.ratio,
            country_margin: query.country_margin,
            shop_margin: query.shop_margin,
            item_margin: query.item_margin,
            final_fee: query.final_fee,
        });
        let rounded = snapshot.currency(&query.affiliate_region).round(price);
        Ok(to_db_price(rounded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockServices;
    use crate::db::{init_db, Repository};
    use crate::domain::Region;
    use crate::resolver::sources::{ExchangeRateSource, ItemInfoSource, ShopInfoSource};
    use tempfile::TempDir;

    const RULES: &str = r#"{
        "common_price_configs": [
            {"primary_region": "SG", "affiliate_region": "TH", "exchange_rate": "3"},
            {"primary_region": "SG", "affiliate_region": "ID"}
        ],
        "rate_tables": [
            {"key": "t1", "rows": [{"weight_range": "inf", "start_price": "2", "start_weight": "0",
              "round_size": "0", "price": "0", "weight_step": "1", "adjustment": "0"}]}
        ],
        "region_rate_tables": [
            {"merchant_region": "CN", "primary_region": "SG",
             "affi_keys": {"MY": "t1", "TH": "t1", "VN": "t1"}}
        ]
    }"#;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn query(query_id: u64, affiliate: &str) -> CbSipPriceQuery {
        CbSipPriceQuery {
            query_id,
            shop_id: 1,
            item_id: 10,
            primary_region: Region::new("SG"),
            affiliate_region: Region::new(affiliate),
            primary_price: 10_000_000,
            weight: 50_000,
            price_ratio: Decimal::one(),
            ratio: Decimal::one(),
            country_margin: Decimal::zero(),
            shop_margin: Decimal::zero(),
            item_margin: Decimal::zero(),
            final_fee: Decimal::one(),
        }
    }

    async fn setup() -> (CbSipResolver, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db").to_string_lossy().to_string();
        let repo = Arc::new(Repository::new(init_db(&db_path).await.unwrap()));
        repo.upsert_exchange_rate(&Region::new("SG"), &Region::new("MY"), 50_000)
            .await
            .unwrap();

        let mock = Arc::new(
            MockServices::new()
                .with_shop(ShopInfo::new(1, Region::new("SG")))
                .with_item(ItemInfo {
                    item_id: 10,
                    shop_id: 1,
                    weight: 50_000,
                    rate_table_cfg: None,
                }),
        );
        let resolver = CbSipResolver::new(
            Arc::new(ShopInfoSource::new(mock.clone())),
            Arc::new(ItemInfoSource::new(mock)),
            Arc::new(ExchangeRateSource::new(repo)),
        );
        (resolver, temp_dir)
    }

    #[tokio::test]
    async fn test_price_with_stored_and_fallback_rates() {
        let (resolver, _temp) = setup().await;
        let snapshot = PricingSnapshot::from_json_str(RULES).unwrap();
        let queries = [query(1, "MY"), query(2, "TH"), query(3, "VN")];
        let data = resolver.build(&snapshot, &queries).await;

        // (100 * 0.5 + 2) * 1 * 1 * 1
        assert_eq!(data.price(&queries[0], &snapshot), Ok(5_200_000));
        // no stored SG->TH rate: config rate 3
        assert_eq!(data.price(&queries[1], &snapshot), Ok(30_200_000));
        assert!(matches!(
            data.price(&queries[2], &snapshot),
            Err(PricingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rate_table_miss_is_not_found() {
        let (resolver, _temp) = setup().await;
        let snapshot = PricingSnapshot::from_json_str(RULES).unwrap();
        let q = query(1, "ID");
        let data = resolver.build(&snapshot, std::slice::from_ref(&q)).await;
        let err = data.price(&q, &snapshot).unwrap_err();
        assert!(err.to_string().contains("hidden fee rate table"));
    }

    #[tokio::test]
    async fn test_margin_sum_clamped() {
        let (resolver, _temp) = setup().await;
        let snapshot = PricingSnapshot::from_json_str(RULES).unwrap();
        let mut q = query(1, "MY");
        q.country_margin = d("-0.5");
        q.shop_margin = d("-0.5");
        q.item_margin = d("-0.5");
        let data = resolver.build(&snapshot, std::slice::from_ref(&q)).await;
        assert_eq!(data.price(&q, &snapshot), Ok(5_200_000));
    }
}
