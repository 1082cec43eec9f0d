use super::cancel::CancelToken;
use super::pool::PoolHandle;
use crate::db::ProfitRateLimit;
use crate::domain::numeric::{to_db_price, to_real_price, PERCENT_PRECISION_BETWEEN_MTSKU_AND_MPSKU};
use crate::domain::{
    CbSipPriceQuery, CbscPriceQuery, Decimal, DiscountTarget, GetHidePriceForCbscRequest,
    GlobalDiscountQuery, GlobalDiscountResult, LocalSipHiddenPriceQuery, LocalSipPriceQuery,
    LocalSipShippingFeeQuery, QueryId, QueryResult, Region, SnapshotStore,
};
use crate::engine::{discount_rate_from_price, price_from_discount_rate};
use crate::error::PricingError;
use crate::resolver::cbsc::MAX_PROFIT_RATE;
use crate::resolver::{CbSipResolver, CbscResolver, LocalSipResolver, SetPriceFactorEntry};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point for every pricing batch.
///
/// A batch is validated as a whole first; a structural problem fails the
/// call with `Parameter`. After that each query gets its own result, in
/// input order, and one query failing never affects another.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    pool: PoolHandle,
    snapshots: SnapshotStore,
    local_sip: LocalSipResolver,
    cb_sip: CbSipResolver,
    cbsc: CbscResolver,
    max_batch_size: usize,
}

type BatchResult<T> = Result<Vec<QueryResult<T>>, PricingError>;

impl BatchOrchestrator {
    pub fn new(
        pool: PoolHandle,
        snapshots: SnapshotStore,
        local_sip: LocalSipResolver,
        cb_sip: CbSipResolver,
        cbsc: CbscResolver,
        max_batch_size: usize,
    ) -> Self {
        Self {
            pool,
            snapshots,
            local_sip,
            cb_sip,
            cbsc,
            max_batch_size,
        }
    }

    pub fn pool(&self) -> &PoolHandle {
        &self.pool
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub async fn get_local_sip_hidden_prices(
        &self,
        queries: &[LocalSipHiddenPriceQuery],
    ) -> BatchResult<i64> {
        self.validate(queries, |q| {
            require_ids(&[("shop_id", q.shop_id), ("item_id", q.item_id)])?;
            require_regions(&q.primary_region, &q.affiliate_region)?;
            require_non_negative("weight", q.weight)
        })?;
        let snapshot = self.snapshots.current();
        let fees = self.local_sip.hidden_prices(&snapshot, queries).await;
        Ok(collect_fees(queries, fees))
    }

    pub async fn get_local_sip_shipping_fees(
        &self,
        queries: &[LocalSipShippingFeeQuery],
    ) -> BatchResult<i64> {
        self.validate(queries, |q| {
            require_ids(&[("shop_id", q.shop_id), ("item_id", q.item_id)])?;
            require_regions(&q.primary_region, &q.affiliate_region)?;
            require_non_negative("weight", q.weight)
        })?;
        let snapshot = self.snapshots.current();
        let fees = self.local_sip.shipping_fees(&snapshot, queries).await;
        Ok(collect_fees(queries, fees))
    }

    pub async fn calculate_local_sip_prices(
        &self,
        ctx: &CancelToken,
        queries: &[LocalSipPriceQuery],
    ) -> BatchResult<i64> {
        self.validate(queries, |q| {
            require_ids(&[("shop_id", q.shop_id), ("item_id", q.item_id)])?;
            require_regions(&q.primary_region, &q.affiliate_region)?;
            require_positive("primary_price", q.primary_price)
        })?;
        let snapshot = self.snapshots.current();
        let data = Arc::new(self.local_sip.build(&snapshot, queries).await);
        self.fan_out(ctx, queries, move |q| data.price(q, &snapshot))
            .await
    }

    pub async fn calculate_cb_sip_prices(
        &self,
        ctx: &CancelToken,
        queries: &[CbSipPriceQuery],
    ) -> BatchResult<i64> {
        self.validate(queries, |q| {
            require_ids(&[("shop_id", q.shop_id), ("item_id", q.item_id)])?;
            require_regions(&q.primary_region, &q.affiliate_region)?;
            require_positive("primary_price", q.primary_price)?;
            require_non_negative("weight", q.weight)
        })?;
        let snapshot = self.snapshots.current();
        let data = Arc::new(self.cb_sip.build(&snapshot, queries).await);
        self.fan_out(ctx, queries, move |q| data.price(q, &snapshot))
            .await
    }

    /// Fixed-point CBSC hidden fee per request.
    pub async fn get_hide_prices_for_cbsc(
        &self,
        requests: &[GetHidePriceForCbscRequest],
    ) -> BatchResult<i64> {
        self.validate(requests, |r| {
            require_ids(&[
                ("merchant_id", r.merchant_id),
                ("shop_id", r.shop_id),
                ("item_id", r.item_id),
            ])
        })?;
        let fees = self.cbsc.hidden_prices(requests).await;
        Ok(collect_fees(requests, fees))
    }

    pub async fn calculate_cbsc_prices(
        &self,
        ctx: &CancelToken,
        queries: &[CbscPriceQuery],
    ) -> BatchResult<i64> {
        self.validate(queries, |q| {
            require_ids(&[
                ("merchant_id", q.merchant_id),
                ("shop_id", q.shop_id),
                ("item_id", q.item_model.item_id),
            ])?;
            require_positive("price", q.price)
        })?;
        let snapshot = self.snapshots.current();
        let data = Arc::new(self.cbsc.build(queries).await);
        self.fan_out(ctx, queries, move |q| data.price(q, &snapshot))
            .await
    }

    /// Discount between MTSKU and MPSKU prices. An out-of-range rate is an
    /// `InvalidDiscountRate` on that query only.
    pub async fn calculate_global_discounts(
        &self,
        ctx: &CancelToken,
        queries: &[GlobalDiscountQuery],
    ) -> BatchResult<GlobalDiscountResult> {
        self.validate(queries, |q| require_positive("mtsku_price", q.mtsku_price))?;
        self.fan_out(ctx, queries, global_discount).await
    }

    /// Store CBSC profit rates. Non-positive rates fail the batch; a rate
    /// outside the merchant's limit fails its own entry.
    pub async fn set_cbsc_price_factors(&self, entries: &[SetPriceFactorEntry]) -> BatchResult<()> {
        self.validate(entries, |e| {
            require_ids(&[("merchant_id", e.merchant_id), ("shop_id", e.shop_id)])?;
            require_positive("profit_rate", e.profit_rate)?;
            if e.profit_rate > MAX_PROFIT_RATE {
                return Err(format!("profit_rate above {}", MAX_PROFIT_RATE));
            }
            Ok(())
        })?;
        let outcomes = self.cbsc.set_price_factors(entries).await;
        Ok(entries
            .iter()
            .zip(outcomes)
            .map(|(e, outcome)| QueryResult {
                query_id: e.query_id(),
                outcome,
            })
            .collect())
    }

    pub async fn update_profit_rate_limit(&self, limit: &ProfitRateLimit) -> Result<(), PricingError> {
        if limit.merchant_id == 0 {
            return Err(PricingError::Parameter("merchant_id is required".to_string()));
        }
        self.cbsc.update_profit_rate_limit(limit).await
    }

    /// Batch-level checks, then `check` on every element.
    fn validate<Q: QueryId>(
        &self,
        queries: &[Q],
        check: impl Fn(&Q) -> Result<(), String>,
    ) -> Result<(), PricingError> {
        if queries.is_empty() {
            return Err(PricingError::Parameter("empty batch".to_string()));
        }
        if queries.len() > self.max_batch_size {
            return Err(PricingError::Parameter(format!(
                "batch of {} exceeds the maximum of {}",
                queries.len(),
                self.max_batch_size
            )));
        }
        let mut seen = HashSet::with_capacity(queries.len());
        for q in queries {
            if !seen.insert(q.query_id()) {
                return Err(PricingError::Parameter(format!(
                    "duplicate query_id {}",
                    q.query_id()
                )));
            }
            check(q).map_err(|msg| {
                PricingError::Parameter(format!("query {}: {}", q.query_id(), msg))
            })?;
        }
        Ok(())
    }

    /// Evaluate every query on the worker pool. Results come back in input
    /// order regardless of completion order.
    async fn fan_out<Q, T, F>(&self, ctx: &CancelToken, queries: &[Q], eval: F) -> BatchResult<T>
    where
        Q: QueryId + Clone + Send + Sync + 'static,
        T: Send + 'static,
        F: Fn(&Q) -> Result<T, PricingError> + Send + Sync + 'static,
    {
        let pool = self.pool.current();
        let eval = Arc::new(eval);

        let mut pending = Vec::with_capacity(queries.len());
        for query in queries {
            let eval = eval.clone();
            let query = query.clone();
            let rx = pool
                .spawn(ctx, async move { (eval.as_ref())(&query) })
                .await?;
            pending.push(rx);
        }
        debug!(count = pending.len(), "batch dispatched");

        let mut results = Vec::with_capacity(queries.len());
        for (query, rx) in queries.iter().zip(pending) {
            let outcome = rx.await.unwrap_or_else(|_| {
                Err(PricingError::Internal(format!(
                    "query {} produced no result",
                    query.query_id()
                )))
            });
            results.push(QueryResult {
                query_id: query.query_id(),
                outcome,
            });
        }

        let failed = results.iter().filter(|r| !r.is_ok()).count();
        info!(total = results.len(), failed, "batch evaluated");
        Ok(results)
    }
}

fn collect_fees<Q: QueryId>(
    queries: &[Q],
    fees: Vec<Result<Decimal, PricingError>>,
) -> Vec<QueryResult<i64>> {
    queries
        .iter()
        .zip(fees)
        .map(|(q, fee)| QueryResult {
            query_id: q.query_id(),
            outcome: fee.map(to_db_price),
        })
        .collect()
}

fn global_discount(query: &GlobalDiscountQuery) -> Result<GlobalDiscountResult, PricingError> {
    let precision = PERCENT_PRECISION_BETWEEN_MTSKU_AND_MPSKU;
    let mtsku = to_real_price(query.mtsku_price);
    match query.target {
        DiscountTarget::PriceFromRate(rate) => {
            let rate = Decimal::from(rate);
            let mpsku = price_from_discount_rate(mtsku, rate, precision)?;
            Ok(GlobalDiscountResult {
                mpsku_price: to_db_price(mpsku),
                discount_rate: rate,
            })
        }
        DiscountTarget::RateFromPrice(mpsku_price) => {
            let rate = discount_rate_from_price(mtsku, to_real_price(mpsku_price), precision)?;
            Ok(GlobalDiscountResult {
                mpsku_price,
                discount_rate: rate,
            })
        }
    }
}

fn require_ids(ids: &[(&str, u64)]) -> Result<(), String> {
    match ids.iter().find(|(_, id)| *id == 0) {
        Some((name, _)) => Err(format!("{} is required", name)),
        None => Ok(()),
    }
}

fn require_regions(primary: &Region, affiliate: &Region) -> Result<(), String> {
    if primary.is_empty() || affiliate.is_empty() {
        return Err("primary_region and affiliate_region are required".to_string());
    }
    Ok(())
}

fn require_positive(name: &str, value: i64) -> Result<(), String> {
    if value <= 0 {
        return Err(format!("{} must be positive", name));
    }
    Ok(())
}

fn require_non_negative(name: &str, value: i64) -> Result<(), String> {
    if value < 0 {
        return Err(format!("{} must not be negative", name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{MockServices, ShopInfo};
    use crate::db::{init_db, Repository};
    use crate::domain::{ItemModelId, PriceDirection, PricingSnapshot};
    use crate::orchestration::pool::PoolConfig;
    use crate::resolver::sources::{
        CommissionSource, ExchangeRateSource, ItemInfoSource, ProfitRateLimitSource,
        ProfitRateSource, ShopInfoSource,
    };
    use crate::resolver::LogisticsHiddenFeeSource;
    use tempfile::TempDir;

    async fn orchestrator(max_batch_size: usize) -> (BatchOrchestrator, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db").to_string_lossy().to_string();
        let repo = Arc::new(Repository::new(init_db(&db_path).await.unwrap()));
        let mock = Arc::new(MockServices::new().with_shop(ShopInfo::new(1, Region::new("MY"))));

        let shops: Arc<dyn crate::resolver::FactorSource<u64, ShopInfo>> =
            Arc::new(ShopInfoSource::new(mock.clone()));
        let items = Arc::new(ItemInfoSource::new(mock.clone()));
        let exchange = Arc::new(ExchangeRateSource::new(repo.clone()));
        let hidden = LogisticsHiddenFeeSource::new(
            shops.clone(),
            items.clone(),
            mock.clone(),
            mock.clone(),
            10,
        );
        let orchestrator = BatchOrchestrator::new(
            PoolHandle::new(PoolConfig::default()),
            SnapshotStore::new(PricingSnapshot::default()),
            LocalSipResolver::new(repo.clone(), shops.clone(), mock.clone(), mock.clone(), 10),
            CbSipResolver::new(shops.clone(), items, exchange.clone()),
            CbscResolver::new(
                shops,
                Arc::new(CommissionSource::new(mock)),
                exchange,
                Arc::new(ProfitRateSource::new(repo.clone())),
                Arc::new(ProfitRateLimitSource::new(repo.clone())),
                Arc::new(hidden),
                repo,
            ),
            max_batch_size,
        );
        (orchestrator, temp_dir)
    }

    fn discount(query_id: u64, target: DiscountTarget) -> GlobalDiscountQuery {
        GlobalDiscountQuery {
            query_id,
            item_model: ItemModelId::new(1, 1),
            mtsku_price: 10_000_000,
            target,
        }
    }

    #[tokio::test]
    async fn test_structural_errors_fail_the_batch() {
        let (orch, _temp) = orchestrator(2).await;
        let ctx = CancelToken::new();

        let empty = orch.calculate_global_discounts(&ctx, &[]).await;
        assert!(matches!(empty, Err(PricingError::Parameter(_))));

        let too_many: Vec<_> = (1..=3)
            .map(|i| discount(i, DiscountTarget::PriceFromRate(100)))
            .collect();
        let err = orch.calculate_global_discounts(&ctx, &too_many).await.unwrap_err();
        assert!(err.to_string().contains("exceeds"));

        let dup = [
            discount(1, DiscountTarget::PriceFromRate(100)),
            discount(1, DiscountTarget::PriceFromRate(200)),
        ];
        let err = orch.calculate_global_discounts(&ctx, &dup).await.unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let mut free = discount(1, DiscountTarget::PriceFromRate(100));
        free.mtsku_price = 0;
        let err = orch.calculate_global_discounts(&ctx, &[free]).await.unwrap_err();
        assert!(matches!(err, PricingError::Parameter(_)));
    }

    #[tokio::test]
    async fn test_global_discount_both_directions() {
        let (orch, _temp) = orchestrator(10).await;
        let results = orch
            .calculate_global_discounts(
                &CancelToken::new(),
                &[
                    discount(1, DiscountTarget::PriceFromRate(2_500)),
                    discount(2, DiscountTarget::RateFromPrice(7_500_000)),
                    discount(3, DiscountTarget::PriceFromRate(10_000)),
                    discount(4, DiscountTarget::RateFromPrice(10_000_000)),
                ],
            )
            .await
            .unwrap();

        assert_eq!(results[0].value().unwrap().mpsku_price, 7_500_000);
        assert_eq!(
            results[1].value().unwrap().discount_rate,
            Decimal::from(2_500)
        );
        assert!(matches!(
            results[2].error(),
            Some(PricingError::InvalidDiscountRate(_))
        ));
        assert!(matches!(
            results[3].error(),
            Some(PricingError::InvalidDiscountRate(_))
        ));
        let ids: Vec<u64> = results.iter().map(|r| r.query_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cancelled_batch_is_rejected() {
        let (orch, _temp) = orchestrator(10).await;
        let ctx = CancelToken::new();
        ctx.cancel();
        let err = orch
            .calculate_global_discounts(&ctx, &[discount(1, DiscountTarget::PriceFromRate(100))])
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_cbsc_validation_requires_ids_and_price() {
        let (orch, _temp) = orchestrator(10).await;
        let query = CbscPriceQuery {
            query_id: 1,
            merchant_id: 0,
            shop_id: 1,
            item_model: ItemModelId::new(1, 1),
            price: 100,
            direction: PriceDirection::Forward,
        };
        let err = orch
            .calculate_cbsc_prices(&CancelToken::new(), &[query])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("merchant_id"));
    }

    #[tokio::test]
    async fn test_set_factors_rejects_non_positive_rate() {
        let (orch, _temp) = orchestrator(10).await;
        let err = orch
            .set_cbsc_price_factors(&[SetPriceFactorEntry {
                query_id: 1,
                merchant_id: 5,
                shop_id: 1,
                profit_rate: 0,
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::Parameter(_)));
    }
}
