//! CBSC factor gathering and the two admin writes that feed it.
//!
//! An MTSKU price lives in the merchant's currency, an MPSKU price in the
//! shop's. Converting between them needs the shop, its commission rates, the
//! merchant→shop exchange rate, the merchant's profit rate for the shop and
//! the item's hidden fee.

use super::{dedup_keys, lookup, FactorMap, FactorSource, HiddenFeeKey, MerchantShopKey};
use crate::datasource::{CommissionRates, ShopInfo};
use crate::db::{ProfitRateLimit, Repository};
use crate::domain::numeric::{
    to_db_price, to_real_price, to_real_ratio_with, PERCENT_PRECISION_BETWEEN_MTSKU_AND_MPSKU,
};
use crate::domain::{
    CbscPriceQuery, Decimal, GetHidePriceForCbscRequest, MerchantId, PriceDirection,
    PricingSnapshot, QueryId, Region, RegionPair, ShopId,
};
use crate::engine::{calculate_mpsku_price, calculate_mtsku_price, denominator_rate};
use crate::error::PricingError;
use crate::ratetable::cascade::DEFAULT_MERCHANT_REGION;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Upper bound for profit rates and their limits, inclusive.
pub const MAX_PROFIT_RATE: i64 = PERCENT_PRECISION_BETWEEN_MTSKU_AND_MPSKU * 10;

/// One profit-rate write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPriceFactorEntry {
    pub query_id: u64,
    pub merchant_id: MerchantId,
    pub shop_id: ShopId,
    /// Inflated by `PERCENT_PRECISION_BETWEEN_MTSKU_AND_MPSKU`.
    pub profit_rate: i64,
}

impl QueryId for SetPriceFactorEntry {
    fn query_id(&self) -> u64 {
        self.query_id
    }
}

fn merchant_region(shop: &ShopInfo) -> Region {
    shop.merchant_region
        .clone()
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| Region::new(DEFAULT_MERCHANT_REGION))
}

fn ratio(raw: i64) -> Decimal {
    to_real_ratio_with(raw, PERCENT_PRECISION_BETWEEN_MTSKU_AND_MPSKU)
}

fn owned_shop(
    shops: &FactorMap<ShopId, ShopInfo>,
    merchant_id: MerchantId,
    shop_id: ShopId,
) -> Result<ShopInfo, PricingError> {
    let shop = lookup(shops, &shop_id, "shop")?;
    if shop.merchant_id != Some(merchant_id) {
        return Err(PricingError::NotFound(format!(
            "shop {} under merchant {}",
            shop_id, merchant_id
        )));
    }
    Ok(shop)
}

/// `Ok` when `rate` is within the merchant's limit or the merchant has none.
fn check_limit(
    limits: &FactorMap<MerchantId, ProfitRateLimit>,
    merchant_id: MerchantId,
    rate: i64,
) -> Result<(), PricingError> {
    match lookup(limits, &merchant_id, "profit rate limit") {
        Ok(limit) if limit.contains(rate) => Ok(()),
        Ok(limit) => Err(PricingError::ProfitRateLimit(format!(
            "profit rate {} outside [{}, {}] for merchant {}",
            rate, limit.min_rate, limit.max_rate, merchant_id
        ))),
        Err(PricingError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone)]
pub struct CbscResolver {
    shops: Arc<dyn FactorSource<ShopId, ShopInfo>>,
    commissions: Arc<dyn FactorSource<ShopId, CommissionRates>>,
    exchange_rates: Arc<dyn FactorSource<RegionPair, Decimal>>,
    profit_rates: Arc<dyn FactorSource<MerchantShopKey, i64>>,
    profit_limits: Arc<dyn FactorSource<MerchantId, ProfitRateLimit>>,
    hidden_fees: Arc<dyn FactorSource<HiddenFeeKey, Decimal>>,
    repo: Arc<Repository>,
}

impl CbscResolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shops: Arc<dyn FactorSource<ShopId, ShopInfo>>,
        commissions: Arc<dyn FactorSource<ShopId, CommissionRates>>,
        exchange_rates: Arc<dyn FactorSource<RegionPair, Decimal>>,
        profit_rates: Arc<dyn FactorSource<MerchantShopKey, i64>>,
        profit_limits: Arc<dyn FactorSource<MerchantId, ProfitRateLimit>>,
        hidden_fees: Arc<dyn FactorSource<HiddenFeeKey, Decimal>>,
        repo: Arc<Repository>,
    ) -> Self {
        Self {
            shops,
            commissions,
            exchange_rates,
            profit_rates,
            profit_limits,
            hidden_fees,
            repo,
        }
    }

    /// Gather every factor `queries` need. Shops go first since the exchange
    /// pair depends on them; everything else is fetched concurrently.
    pub async fn build(&self, queries: &[CbscPriceQuery]) -> CalcFactorDataForMtskuAndMpsku {
        let shop_ids = dedup_keys(queries.iter().map(|q| q.shop_id));
        let shops = self.shops.fetch_many(&shop_ids).await;

        let pairs = dedup_keys(queries.iter().filter_map(|q| {
            let shop = shops.get(&q.shop_id)?.as_ref().ok()?;
            Some(RegionPair::new(merchant_region(shop), shop.region.clone()))
        }));
        let profit_keys =
            dedup_keys(queries.iter().map(|q| MerchantShopKey::new(q.merchant_id, q.shop_id)));
        let merchant_ids = dedup_keys(queries.iter().map(|q| q.merchant_id));
        let fee_keys = dedup_keys(
            queries
                .iter()
                .map(|q| HiddenFeeKey::new(q.shop_id, q.item_model.item_id, q.direction)),
        );

        let (commissions, exchange_rates, profit_rates, profit_limits, hidden_fees) = tokio::join!(
            self.commissions.fetch_many(&shop_ids),
            self.exchange_rates.fetch_many(&pairs),
            self.profit_rates.fetch_many(&profit_keys),
            self.profit_limits.fetch_many(&merchant_ids),
            self.hidden_fees.fetch_many(&fee_keys),
        );

        CalcFactorDataForMtskuAndMpsku {
            shops,
            commissions,
            exchange_rates,
            profit_rates,
            profit_limits,
            hidden_fees,
        }
    }

    /// Real hidden fee per request, in request order.
    pub async fn hidden_prices(
        &self,
        requests: &[GetHidePriceForCbscRequest],
    ) -> Vec<Result<Decimal, PricingError>> {
        let shop_ids = dedup_keys(requests.iter().map(|r| r.shop_id));
        let fee_keys = dedup_keys(
            requests
                .iter()
                .map(|r| HiddenFeeKey::new(r.shop_id, r.item_id, r.direction)),
        );
        let (shops, fees) = tokio::join!(
            self.shops.fetch_many(&shop_ids),
            self.hidden_fees.fetch_many(&fee_keys),
        );

        requests
            .iter()
            .map(|r| {
                owned_shop(&shops, r.merchant_id, r.shop_id)?;
                lookup(
                    &fees,
                    &HiddenFeeKey::new(r.shop_id, r.item_id, r.direction),
                    "hidden fee",
                )
            })
            .collect()
    }

    /// Store profit rates, each checked against its merchant's limit.
    /// Stored entries are dropped from every cache tier.
    pub async fn set_price_factors(
        &self,
        entries: &[SetPriceFactorEntry],
    ) -> Vec<Result<(), PricingError>> {
        let merchant_ids = dedup_keys(entries.iter().map(|e| e.merchant_id));
        let limits = self.profit_limits.fetch_many(&merchant_ids).await;

        let mut outcomes = Vec::with_capacity(entries.len());
        let mut written = Vec::new();
        for entry in entries {
            let outcome = match check_limit(&limits, entry.merchant_id, entry.profit_rate) {
                Ok(()) => self
                    .repo
                    .upsert_profit_rate(entry.merchant_id, entry.shop_id, entry.profit_rate)
                    .await
                    .map_err(PricingError::from),
                Err(e) => Err(e),
            };
            match &outcome {
                Ok(()) => written.push(MerchantShopKey::new(entry.merchant_id, entry.shop_id)),
                Err(e) => warn!(
                    merchant_id = entry.merchant_id,
                    shop_id = entry.shop_id,
                    error = %e,
                    "profit rate not stored"
                ),
            }
            outcomes.push(outcome);
        }

        if !written.is_empty() {
            self.profit_rates.invalidate(&written).await;
        }
        info!(
            requested = entries.len(),
            stored = written.len(),
            "profit rates updated"
        );
        outcomes
    }

    /// Replace a merchant's profit-rate limit.
    pub async fn update_profit_rate_limit(
        &self,
        limit: &ProfitRateLimit,
    ) -> Result<(), PricingError> {
        let in_range = |rate: i64| rate > 0 && rate <= MAX_PROFIT_RATE;
        if !in_range(limit.min_rate) || !in_range(limit.max_rate) || limit.min_rate > limit.max_rate
        {
            return Err(PricingError::Parameter(format!(
                "profit rate limit [{}, {}] must satisfy 0 < min <= max <= {}",
                limit.min_rate, limit.max_rate, MAX_PROFIT_RATE
            )));
        }

        self.repo.update_profit_rate_limit(limit).await?;
        self.profit_limits.invalidate(&[limit.merchant_id]).await;
        info!(
            merchant_id = limit.merchant_id,
            min_rate = limit.min_rate,
            max_rate = limit.max_rate,
            "profit rate limit updated"
        );
        Ok(())
    }
}

/// Factors resolved for one CBSC batch.
#[derive(Debug, Clone, Default)]
pub struct CalcFactorDataForMtskuAndMpsku {
    shops: FactorMap<ShopId, ShopInfo>,
    commissions: FactorMap<ShopId, CommissionRates>,
    exchange_rates: FactorMap<RegionPair, Decimal>,
    profit_rates: FactorMap<MerchantShopKey, i64>,
    profit_limits: FactorMap<MerchantId, ProfitRateLimit>,
    hidden_fees: FactorMap<HiddenFeeKey, Decimal>,
}

impl CalcFactorDataForMtskuAndMpsku {
    /// Converted fixed-point price. Forward results are rounded by the
    /// shop's currency, reverse results by the merchant's.
    pub fn price(
        &self,
        query: &CbscPriceQuery,
        snapshot: &PricingSnapshot,
    ) -> Result<i64, PricingError> {
        let shop = owned_shop(&self.shops, query.merchant_id, query.shop_id)?;
        let profit_rate = lookup(
            &self.profit_rates,
            &MerchantShopKey::new(query.merchant_id, query.shop_id),
            "profit rate",
        )?;
        check_limit(&self.profit_limits, query.merchant_id, profit_rate)?;

        let commission = lookup(&self.commissions, &query.shop_id, "commission rates")?;
        let denominator = denominator_rate(
            ratio(commission.commission_rate),
            ratio(commission.transaction_fee_rate),
            ratio(commission.service_fee_rate),
        );

        let merchant_region = merchant_region(&shop);
        let exchange_rate = lookup(
            &self.exchange_rates,
            &RegionPair::new(merchant_region.clone(), shop.region.clone()),
            "exchange rate",
        )?;
        let hidden_fee = lookup(
            &self.hidden_fees,
            &HiddenFeeKey::new(query.shop_id, query.item_model.item_id, query.direction),
            "hidden fee",
        )?;

        let price = to_real_price(query.price);
        let profit = ratio(profit_rate);
        let (converted, currency_region) = match query.direction {
            PriceDirection::Forward => (
                calculate_mpsku_price(price, exchange_rate, profit, hidden_fee, denominator),
                &shop.region,
            ),
            PriceDirection::Reverse => (
                calculate_mtsku_price(price, exchange_rate, profit, hidden_fee, denominator),
                &merchant_region,
            ),
        };
        let rounded = snapshot.currency(currency_region).round(converted);
        Ok(to_db_price(rounded))
    }
}
