//! Local SIP factor gathering: hidden price and shipping fee per listing.

use super::hidden_fee::{multi_warehouse_hidden_fee, quote_in_chunks};
use super::{dedup_keys, lookup, FactorSource};
use crate::datasource::{
    HiddenFeeRequest, ItemService, LogisticsService, ShippingFeeRequest, ShopInfo, ShopItemId,
};
use crate::db::Repository;
use crate::domain::numeric::{db_weight_to_gram, to_db_price, to_real_price};
use crate::domain::{
    ChannelId, Decimal, FeeSourceToggle, ItemId, LocalSipHiddenPriceQuery, LocalSipPriceQuery,
    LocalSipShippingFeeQuery, PricingSnapshot, RegionPair, ShopId,
};
use crate::engine::{local_sip_affiliate_price, LocalSipFactors, LocalSipPriceInput};
use crate::error::PricingError;
use crate::ratetable::HiddenPriceConf;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One affiliate listing whose fees are being resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Listing {
    shop_id: ShopId,
    item_id: ItemId,
    pair: RegionPair,
    /// Fixed-point weight.
    weight: i64,
}

impl From<&LocalSipHiddenPriceQuery> for Listing {
    fn from(q: &LocalSipHiddenPriceQuery) -> Self {
        Listing {
            shop_id: q.shop_id,
            item_id: q.item_id,
            pair: RegionPair::new(q.primary_region.clone(), q.affiliate_region.clone()),
            weight: q.weight,
        }
    }
}

impl From<&LocalSipShippingFeeQuery> for Listing {
    fn from(q: &LocalSipShippingFeeQuery) -> Self {
        Listing {
            shop_id: q.shop_id,
            item_id: q.item_id,
            pair: RegionPair::new(q.primary_region.clone(), q.affiliate_region.clone()),
            weight: q.weight,
        }
    }
}

impl From<&LocalSipPriceQuery> for Listing {
    fn from(q: &LocalSipPriceQuery) -> Self {
        Listing::from(&q.hidden_price_query())
    }
}

#[derive(Debug, Clone, Copy)]
enum Fee {
    Hidden,
    Shipping,
}

impl Fee {
    fn toggle(self, snapshot: &PricingSnapshot, pair: &RegionPair) -> FeeSourceToggle {
        snapshot
            .price_config(&pair.primary, &pair.affiliate)
            .map(|cfg| match self {
                Fee::Hidden => cfg.hidden_fee_source,
                Fee::Shipping => cfg.shipping_fee_source,
            })
            .unwrap_or_default()
    }
}

type Outcomes = Vec<(usize, Result<Decimal, PricingError>)>;

/// Resolves Local SIP hidden prices and shipping fees from the bracket
/// tables or, where the region pair is switched over, from logistics.
#[derive(Debug, Clone)]
pub struct LocalSipResolver {
    repo: Arc<Repository>,
    shops: Arc<dyn FactorSource<ShopId, ShopInfo>>,
    item_service: Arc<dyn ItemService>,
    logistics: Arc<dyn LogisticsService>,
    batch_size: usize,
}

impl LocalSipResolver {
    pub fn new(
        repo: Arc<Repository>,
        shops: Arc<dyn FactorSource<ShopId, ShopInfo>>,
        item_service: Arc<dyn ItemService>,
        logistics: Arc<dyn LogisticsService>,
        batch_size: usize,
    ) -> Self {
        Self {
            repo,
            shops,
            item_service,
            logistics,
            batch_size: batch_size.max(1),
        }
    }

    /// Real hidden price per query, in query order.
    pub async fn hidden_prices(
        &self,
        snapshot: &PricingSnapshot,
        queries: &[LocalSipHiddenPriceQuery],
    ) -> Vec<Result<Decimal, PricingError>> {
        let listings: Vec<Listing> = queries.iter().map(Listing::from).collect();
        self.resolve_hidden(snapshot, &listings).await
    }

    /// Real shipping fee per query, in query order.
    pub async fn shipping_fees(
        &self,
        snapshot: &PricingSnapshot,
        queries: &[LocalSipShippingFeeQuery],
    ) -> Vec<Result<Decimal, PricingError>> {
        let listings: Vec<Listing> = queries.iter().map(Listing::from).collect();
        self.resolve_shipping(snapshot, &listings).await
    }

    /// Gather the fees every price query needs. Queries that will not use
    /// them (no price config, or no weight) are left out.
    pub async fn build(
        &self,
        snapshot: &PricingSnapshot,
        queries: &[LocalSipPriceQuery],
    ) -> CalcFactorDataForLocalSip {
        let priced: Vec<&LocalSipPriceQuery> = queries
            .iter()
            .filter(|q| {
                q.affiliate_weight > 0
                    && snapshot
                        .price_config(&q.primary_region, &q.affiliate_region)
                        .is_some()
            })
            .collect();
        let listings: Vec<Listing> = priced.iter().map(|q| Listing::from(*q)).collect();

        let (hidden, shipping) = tokio::join!(
            self.resolve_hidden(snapshot, &listings),
            self.resolve_shipping(snapshot, &listings),
        );

        CalcFactorDataForLocalSip {
            hidden_prices: priced.iter().map(|q| q.query_id).zip(hidden).collect(),
            shipping_fees: priced.iter().map(|q| q.query_id).zip(shipping).collect(),
        }
    }

    async fn resolve_hidden(
        &self,
        snapshot: &PricingSnapshot,
        listings: &[Listing],
    ) -> Vec<Result<Decimal, PricingError>> {
        let (by_table, by_logistics) = split_by_toggle(snapshot, listings, Fee::Hidden);

        let (mut outcomes, quoted) = tokio::join!(
            self.static_fees(snapshot, listings, by_table, Fee::Hidden),
            self.logistics_hidden_fees(snapshot, listings, by_logistics),
        );
        outcomes.extend(quoted);
        into_ordered(outcomes)
    }

    async fn resolve_shipping(
        &self,
        snapshot: &PricingSnapshot,
        listings: &[Listing],
    ) -> Vec<Result<Decimal, PricingError>> {
        let (by_table, by_logistics) = split_by_toggle(snapshot, listings, Fee::Shipping);

        let pending: Vec<(usize, ShippingFeeRequest)> = by_logistics
            .into_iter()
            .map(|seq| {
                let l = &listings[seq];
                let req = ShippingFeeRequest {
                    shop_id: l.shop_id,
                    item_id: l.item_id,
                    primary_region: l.pair.primary.clone(),
                    affiliate_region: l.pair.affiliate.clone(),
                    weight: l.weight,
                };
                (seq, req)
            })
            .collect();

        let (mut outcomes, quoted) = tokio::join!(
            self.static_fees(snapshot, listings, by_table, Fee::Shipping),
            quote_in_chunks(
                pending,
                self.batch_size,
                |requests| {
                    let logistics = self.logistics.clone();
                    async move { logistics.calculate_shipping_fees(&requests).await }
                },
                PricingError::ExternalService,
            ),
        );
        outcomes.extend(quoted);
        into_ordered(outcomes)
    }

    /// Fees from the persisted bracket tables, one query per distinct
    /// (region pair, weight).
    async fn static_fees(
        &self,
        snapshot: &PricingSnapshot,
        listings: &[Listing],
        seqs: Vec<usize>,
        fee: Fee,
    ) -> Outcomes {
        let keys = dedup_keys(seqs.iter().map(|&seq| (listings[seq].pair.clone(), listings[seq].weight)));
        let mut brackets: HashMap<(RegionPair, i64), Result<Option<HiddenPriceConf>, PricingError>> =
            HashMap::with_capacity(keys.len());
        for (pair, weight) in keys {
            let found = match fee {
                Fee::Hidden => {
                    self.repo
                        .get_hidden_price_config_record_by_weight(&pair.primary, &pair.affiliate, weight)
                        .await
                }
                Fee::Shipping => {
                    self.repo
                        .get_local_shipping_fee_config_record_by_weight(
                            &pair.primary,
                            &pair.affiliate,
                            weight,
                        )
                        .await
                }
            };
            brackets.insert((pair, weight), found.map_err(PricingError::from));
        }

        seqs.into_iter()
            .map(|seq| {
                let l = &listings[seq];
                let bracket = brackets
                    .get(&(l.pair.clone(), l.weight))
                    .cloned()
                    .unwrap_or(Ok(None));
                (seq, static_fee(snapshot, l, bracket, fee))
            })
            .collect()
    }

    async fn logistics_hidden_fees(
        &self,
        snapshot: &PricingSnapshot,
        listings: &[Listing],
        seqs: Vec<usize>,
    ) -> Outcomes {
        if seqs.is_empty() {
            return Vec::new();
        }

        let shop_ids = dedup_keys(seqs.iter().map(|&seq| listings[seq].shop_id));
        let shop_items = dedup_keys(
            seqs.iter()
                .map(|&seq| ShopItemId::new(listings[seq].shop_id, listings[seq].item_id)),
        );
        let (shops, channels) = tokio::join!(
            self.shops.fetch_many(&shop_ids),
            self.item_service.get_enabled_channels(&shop_items),
        );
        let channels = channels.map_err(|e| {
            warn!(count = shop_items.len(), error = %e, "enabled channel lookup failed");
            PricingError::GetEnabledChannels(e.to_string())
        });

        let mut outcomes = Vec::with_capacity(seqs.len());
        let mut single = Vec::new();
        let mut multi = Vec::new();
        for seq in seqs {
            let l = &listings[seq];
            let routed = (|| -> Result<(ShopInfo, Vec<ChannelId>), PricingError> {
                let shop = lookup(&shops, &l.shop_id, "shop")?;
                let enabled = match &channels {
                    Ok(map) => map
                        .get(&ShopItemId::new(l.shop_id, l.item_id))
                        .cloned()
                        .unwrap_or_default(),
                    Err(e) => return Err(e.clone()),
                };
                if enabled.is_empty() {
                    return Err(PricingError::EmptyEnabledChannels(format!(
                        "shop {} item {}",
                        l.shop_id, l.item_id
                    )));
                }
                Ok((shop, enabled.iter().map(|c| c.channel_id).collect()))
            })();

            let buyer_location = snapshot
                .price_config(&l.pair.primary, &l.pair.affiliate)
                .and_then(|cfg| cfg.buyer_location.clone());
            match routed {
                Err(e) => outcomes.push((seq, Err(e))),
                Ok((shop, channel_ids)) => match buyer_location {
                    Some(buyer) if shop.warehouse_locations.len() > 1 => {
                        multi.push((seq, shop.warehouse_locations, buyer, channel_ids))
                    }
                    _ => single.push((
                        seq,
                        HiddenFeeRequest {
                            shop_id: l.shop_id,
                            item_id: l.item_id,
                            region: l.pair.affiliate.clone(),
                            weight: l.weight,
                            channel_ids,
                        },
                    )),
                },
            }
        }
        debug!(
            single = single.len(),
            multi_warehouse = multi.len(),
            "local sip hidden fees via logistics"
        );

        let warehouse_quotes = join_all(multi.iter().map(|(seq, sellers, buyer, channel_ids)| {
            let l = &listings[*seq];
            async move {
                let fee = multi_warehouse_hidden_fee(
                    self.logistics.as_ref(),
                    &l.pair.affiliate,
                    sellers,
                    buyer,
                    channel_ids,
                    l.weight,
                )
                .await;
                (*seq, fee)
            }
        }));
        let single_quotes = quote_in_chunks(
            single,
            self.batch_size,
            |requests| {
                let logistics = self.logistics.clone();
                async move { logistics.calculate_hidden_fees(&requests).await }
            },
            PricingError::CalculateHiddenFee,
        );
        let (warehouse_quotes, single_quotes) = tokio::join!(warehouse_quotes, single_quotes);
        outcomes.extend(warehouse_quotes);
        outcomes.extend(single_quotes);
        outcomes
    }
}

/// Indexes of listings served by the bracket tables and by logistics.
fn split_by_toggle(
    snapshot: &PricingSnapshot,
    listings: &[Listing],
    fee: Fee,
) -> (Vec<usize>, Vec<usize>) {
    (0..listings.len()).partition(|&seq| fee.toggle(snapshot, &listings[seq].pair) == FeeSourceToggle::Static)
}

fn static_fee(
    snapshot: &PricingSnapshot,
    listing: &Listing,
    bracket: Result<Option<HiddenPriceConf>, PricingError>,
    fee: Fee,
) -> Result<Decimal, PricingError> {
    if let Some(conf) = bracket? {
        return conf.compute_fee(db_weight_to_gram(listing.weight));
    }
    let fallback = match fee {
        Fee::Hidden => snapshot
            .price_config(&listing.pair.primary, &listing.pair.affiliate)
            .and_then(|cfg| cfg.init_hidden_price),
        Fee::Shipping => None,
    };
    fallback.ok_or_else(|| {
        let what = match fee {
            Fee::Hidden => "hidden price config",
            Fee::Shipping => "local shipping fee config",
        };
        PricingError::NotFound(format!("{} for {} weight {}", what, listing.pair, listing.weight))
    })
}

fn into_ordered(mut outcomes: Outcomes) -> Vec<Result<Decimal, PricingError>> {
    outcomes.sort_by_key(|(seq, _)| *seq);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

/// Fees resolved for one Local SIP price batch, keyed by query id.
#[derive(Debug, Clone, Default)]
pub struct CalcFactorDataForLocalSip {
    hidden_prices: HashMap<u64, Result<Decimal, PricingError>>,
    shipping_fees: HashMap<u64, Result<Decimal, PricingError>>,
}

impl CalcFactorDataForLocalSip {
    /// Fixed-point affiliate price for `query`, rounded by the affiliate
    /// currency.
    pub fn price(
        &self,
        query: &LocalSipPriceQuery,
        snapshot: &PricingSnapshot,
    ) -> Result<i64, PricingError> {
        if query.affiliate_weight <= 0 {
            return Ok(0);
        }
        let Some(cfg) = snapshot.price_config(&query.primary_region, &query.affiliate_region)
        else {
            return Ok(query.primary_price);
        };

        let init_hidden_price = lookup(&self.hidden_prices, &query.query_id, "hidden price")?;
        let shipping_fee = lookup(&self.shipping_fees, &query.query_id, "shipping fee")?;
        let input = LocalSipPriceInput {
            primary_price: to_real_price(query.primary_price),
            affiliate_real_weight: db_weight_to_gram(query.affiliate_weight),
            factors: Some(LocalSipFactors {
                exchange_rate: cfg.effective_exchange_rate(),
                country_margin: cfg.effective_buffer(),
                init_hidden_price,
                shipping_fee,
            }),
            item_margin: query.item_margin.unwrap_or_else(Decimal::zero),
            shop_margin: query.shop_margin.unwrap_or_else(Decimal::zero),
            oversea_rate: query.oversea_rate,
        };

        let price = local_sip_affiliate_price(&input);
        let rounded = snapshot.currency(&query.affiliate_region).round(price);
        Ok(to_db_price(rounded))
    }
}
