//! Hidden fees quoted by the logistics service.
//!
//! CBSC items are sorted into buckets before any remote call: items that
//! resolve locally (no channel, or a third-party-fulfilled shop with only
//! local channels) never reach the logistics API. The rest go out in
//! fixed-size chunks, concurrently, and the answers are merged back into
//! request order.

use super::{dedup_keys, lookup, FactorKey, FactorMap, FactorSource};
use crate::datasource::{
    Channel, DataSourceError, FeeQuote, HiddenFeeRequest, ItemInfo, ItemService,
    LocationFeeRequest, LogisticsService, ShopInfo, ShopItemId,
};
use crate::domain::numeric::to_real_price;
use crate::domain::{ChannelId, Decimal, ItemId, PriceDirection, Region, ShopId};
use crate::error::PricingError;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HiddenFeeKey {
    pub shop_id: ShopId,
    pub item_id: ItemId,
    pub direction: PriceDirection,
}

impl HiddenFeeKey {
    pub fn new(shop_id: ShopId, item_id: ItemId, direction: PriceDirection) -> Self {
        Self {
            shop_id,
            item_id,
            direction,
        }
    }

    fn shop_item(&self) -> ShopItemId {
        ShopItemId::new(self.shop_id, self.item_id)
    }
}

impl FactorKey for HiddenFeeKey {
    fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.shop_id, self.item_id, self.direction)
    }
}

/// Where one item's hidden fee comes from.
#[derive(Debug)]
enum Bucket {
    /// Known without asking logistics.
    Resolved(Result<Decimal, PricingError>),
    /// Needs a logistics quote.
    Remote(HiddenFeeRequest),
}

/// Outcome for an item with no enabled channel. Needs neither shop nor item.
fn without_channels(key: &HiddenFeeKey) -> Bucket {
    match key.direction {
        PriceDirection::Forward => Bucket::Resolved(Err(PricingError::EmptyEnabledChannels(
            format!("shop {} item {}", key.shop_id, key.item_id),
        ))),
        PriceDirection::Reverse => Bucket::Resolved(Ok(Decimal::zero())),
    }
}

/// `channels` is non-empty.
fn bucket_for(
    key: &HiddenFeeKey,
    shop: &ShopInfo,
    item: &ItemInfo,
    channels: &[Channel],
) -> Bucket {
    let cross_border: Vec<ChannelId> = channels
        .iter()
        .filter(|c| c.cross_border)
        .map(|c| c.channel_id)
        .collect();
    if shop.is_third_party_fulfilled && cross_border.is_empty() {
        return Bucket::Resolved(Ok(Decimal::zero()));
    }

    let channel_ids = if cross_border.is_empty() {
        channels.iter().map(|c| c.channel_id).collect()
    } else {
        cross_border
    };
    Bucket::Remote(HiddenFeeRequest {
        shop_id: key.shop_id,
        item_id: key.item_id,
        region: shop.region.clone(),
        weight: item.weight,
        channel_ids,
    })
}

/// Hidden fee per (shop, item, direction), quoted by the logistics service.
#[derive(Debug, Clone)]
pub struct LogisticsHiddenFeeSource {
    shops: Arc<dyn FactorSource<ShopId, ShopInfo>>,
    items: Arc<dyn FactorSource<ItemId, ItemInfo>>,
    item_service: Arc<dyn ItemService>,
    logistics: Arc<dyn LogisticsService>,
    batch_size: usize,
}

impl LogisticsHiddenFeeSource {
    pub fn new(
        shops: Arc<dyn FactorSource<ShopId, ShopInfo>>,
        items: Arc<dyn FactorSource<ItemId, ItemInfo>>,
        item_service: Arc<dyn ItemService>,
        logistics: Arc<dyn LogisticsService>,
        batch_size: usize,
    ) -> Self {
        Self {
            shops,
            items,
            item_service,
            logistics,
            batch_size: batch_size.max(1),
        }
    }

    /// Hidden fee for each key, in the order given.
    pub async fn resolve_ordered(&self, keys: &[HiddenFeeKey]) -> Vec<Result<Decimal, PricingError>> {
        let shop_ids = dedup_keys(keys.iter().map(|k| k.shop_id));
        let item_ids = dedup_keys(keys.iter().map(|k| k.item_id));
        let shop_items = dedup_keys(keys.iter().map(HiddenFeeKey::shop_item));

        let (shops, items, channels) = tokio::join!(
            self.shops.fetch_many(&shop_ids),
            self.items.fetch_many(&item_ids),
            self.item_service.get_enabled_channels(&shop_items),
        );
        let channels = channels.map_err(|e| {
            warn!(count = shop_items.len(), error = %e, "enabled channel lookup failed");
            PricingError::GetEnabledChannels(e.to_string())
        });

        let mut resolved: Vec<(usize, Result<Decimal, PricingError>)> = Vec::new();
        let mut remote: Vec<(usize, HiddenFeeRequest)> = Vec::new();
        for (seq, key) in keys.iter().enumerate() {
            let bucket = (|| -> Result<Bucket, PricingError> {
                let channels = match &channels {
                    Ok(map) => map.get(&key.shop_item()).cloned().unwrap_or_default(),
                    Err(e) => return Err(e.clone()),
                };
                if channels.is_empty() {
                    return Ok(without_channels(key));
                }
                let shop = lookup(&shops, &key.shop_id, "shop")?;
                let item = lookup(&items, &key.item_id, "item")?;
                Ok(bucket_for(key, &shop, &item, &channels))
            })();
            match bucket {
                Ok(Bucket::Resolved(outcome)) => resolved.push((seq, outcome)),
                Ok(Bucket::Remote(req)) => remote.push((seq, req)),
                Err(e) => resolved.push((seq, Err(e))),
            }
        }
        debug!(
            local = resolved.len(),
            remote = remote.len(),
            "hidden fee buckets"
        );

        let quoted = quote_in_chunks(
            remote,
            self.batch_size,
            |requests| {
                let logistics = self.logistics.clone();
                async move { logistics.calculate_hidden_fees(&requests).await }
            },
            PricingError::CalculateHiddenFee,
        )
        .await;
        resolved.extend(quoted);

        resolved.sort_by_key(|(seq, _)| *seq);
        resolved.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

/// Send `pending` requests to a positional logistics batch API,
/// `batch_size` at a time and all chunks concurrently.
///
/// Each answer is tagged with the sequence number its request carried. A
/// failed call fails its whole chunk through `on_failure`; so does a failed
/// quote, for that entry only.
pub(crate) async fn quote_in_chunks<R, F, Fut>(
    pending: Vec<(usize, R)>,
    batch_size: usize,
    call: F,
    on_failure: fn(String) -> PricingError,
) -> Vec<(usize, Result<Decimal, PricingError>)>
where
    R: Clone,
    F: Fn(Vec<R>) -> Fut,
    Fut: Future<Output = Result<Vec<FeeQuote>, DataSourceError>>,
{
    let calls = pending.chunks(batch_size.max(1)).map(|chunk| {
        let seqs: Vec<usize> = chunk.iter().map(|(seq, _)| *seq).collect();
        let quoting = call(chunk.iter().map(|(_, r)| r.clone()).collect());
        async move {
            let outcomes: Vec<Result<Decimal, PricingError>> = match quoting.await {
                Ok(quotes) if quotes.len() == seqs.len() => quotes
                    .into_iter()
                    .map(|q| q.into_result().map(to_real_price).map_err(on_failure))
                    .collect(),
                Ok(quotes) => {
                    let err = PricingError::Internal(format!(
                        "logistics returned {} quotes for {} requests",
                        quotes.len(),
                        seqs.len()
                    ));
                    vec![Err(err); seqs.len()]
                }
                Err(e) => {
                    warn!(count = seqs.len(), error = %e, "logistics quote failed");
                    vec![Err(on_failure(e.to_string())); seqs.len()]
                }
            };
            seqs.into_iter().zip(outcomes).collect::<Vec<_>>()
        }
    });
    join_all(calls).await.into_iter().flatten().collect()
}

#[async_trait]
impl FactorSource<HiddenFeeKey, Decimal> for LogisticsHiddenFeeSource {
    async fn fetch_many(&self, keys: &[HiddenFeeKey]) -> FactorMap<HiddenFeeKey, Decimal> {
        let keys = dedup_keys(keys.iter().copied());
        let fees = self.resolve_ordered(&keys).await;
        keys.into_iter().zip(fees).collect()
    }
}

/// Hidden fee for a shop shipping from several warehouses.
///
/// Each (seller location, buyer location) pair is priced at its most
/// expensive channel; the fee is the average over the seller locations that
/// could be priced at all.
pub async fn multi_warehouse_hidden_fee(
    logistics: &dyn LogisticsService,
    region: &Region,
    seller_locations: &[String],
    buyer_location: &str,
    channels: &[ChannelId],
    weight: i64,
) -> Result<Decimal, PricingError> {
    let requests: Vec<LocationFeeRequest> = seller_locations
        .iter()
        .flat_map(|seller| {
            channels.iter().map(move |channel_id| LocationFeeRequest {
                region: region.clone(),
                seller_location: seller.clone(),
                buyer_location: buyer_location.to_string(),
                channel_id: *channel_id,
                weight,
            })
        })
        .collect();
    if requests.is_empty() {
        return Err(PricingError::CalculateHiddenFee(
            "no seller location or channel to quote".to_string(),
        ));
    }

    let quotes = logistics
        .calculate_location_fees(&requests)
        .await
        .map_err(|e| PricingError::CalculateHiddenFee(e.to_string()))?;
    if quotes.len() != requests.len() {
        return Err(PricingError::Internal(format!(
            "logistics returned {} quotes for {} requests",
            quotes.len(),
            requests.len()
        )));
    }

    let mut per_location: HashMap<&str, Decimal> = HashMap::new();
    for (req, quote) in requests.iter().zip(quotes) {
        match quote.into_result() {
            Ok(fee) => {
                let fee = to_real_price(fee);
                per_location
                    .entry(req.seller_location.as_str())
                    .and_modify(|max| *max = (*max).max(fee))
                    .or_insert(fee);
            }
            Err(e) => debug!(
                seller = %req.seller_location,
                channel = req.channel_id,
                error = %e,
                "location fee unavailable"
            ),
        }
    }

    if per_location.is_empty() {
        return Err(PricingError::CalculateHiddenFee(format!(
            "no route from any of {} seller locations to {}",
            seller_locations.len(),
            buyer_location
        )));
    }
    let total: Decimal = per_location.values().copied().sum();
    Ok(total / Decimal::from(per_location.len() as i64))
}
