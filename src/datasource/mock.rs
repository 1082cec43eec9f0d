//! In-memory downstream services for tests.

use super::{
    Channel, CommissionRates, DataSourceError, FeeQuote, HiddenFeeRequest, ItemInfo, ItemService,
    LocationFeeRequest, LogisticsService, MerchantService, ShippingFeeRequest, ShopInfo,
    ShopItemId, ShopService,
};
use crate::domain::{ChannelId, ItemId, ShopId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Call counters, shared between clones.
#[derive(Debug, Default)]
pub struct MockCalls {
    pub get_shops: AtomicUsize,
    pub get_items: AtomicUsize,
    pub get_enabled_channels: AtomicUsize,
    pub get_commission_rates: AtomicUsize,
    pub calculate_hidden_fees: AtomicUsize,
    pub calculate_shipping_fees: AtomicUsize,
    pub calculate_location_fees: AtomicUsize,
    /// Total requests across all `calculate_hidden_fees` calls.
    pub hidden_fee_requests: AtomicUsize,
}

/// Mock implementation of every downstream service trait.
#[derive(Debug, Clone, Default)]
pub struct MockServices {
    shops: HashMap<ShopId, ShopInfo>,
    items: HashMap<ItemId, ItemInfo>,
    channels: HashMap<ShopItemId, Vec<Channel>>,
    commissions: HashMap<ShopId, CommissionRates>,
    hidden_fees: HashMap<ShopItemId, i64>,
    shipping_fees: HashMap<ShopItemId, i64>,
    location_fees: HashMap<(String, String, ChannelId), i64>,
    fail_channels: bool,
    fail_logistics: bool,
    calls: Arc<MockCalls>,
}

impl MockServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shop(mut self, shop: ShopInfo) -> Self {
        self.shops.insert(shop.shop_id, shop);
        self
    }

    pub fn with_item(mut self, item: ItemInfo) -> Self {
        self.items.insert(item.item_id, item);
        self
    }

    pub fn with_channels(mut self, shop_id: ShopId, item_id: ItemId, channels: Vec<Channel>) -> Self {
        self.channels.insert(ShopItemId::new(shop_id, item_id), channels);
        self
    }

    pub fn with_commission(mut self, shop_id: ShopId, rates: CommissionRates) -> Self {
        self.commissions.insert(shop_id, rates);
        self
    }

    /// Fixed-point hidden fee quoted for an item.
    pub fn with_hidden_fee(mut self, shop_id: ShopId, item_id: ItemId, fee: i64) -> Self {
        self.hidden_fees.insert(ShopItemId::new(shop_id, item_id), fee);
        self
    }

    /// Fixed-point shipping fee quoted for an item.
    pub fn with_shipping_fee(mut self, shop_id: ShopId, item_id: ItemId, fee: i64) -> Self {
        self.shipping_fees.insert(ShopItemId::new(shop_id, item_id), fee);
        self
    }

    /// Fixed-point fee between two locations on a channel.
    pub fn with_location_fee(
        mut self,
        seller_location: &str,
        buyer_location: &str,
        channel_id: ChannelId,
        fee: i64,
    ) -> Self {
        self.location_fees.insert(
            (seller_location.to_string(), buyer_location.to_string(), channel_id),
            fee,
        );
        self
    }

    /// Make every `get_enabled_channels` call fail.
    pub fn with_failing_channels(mut self) -> Self {
        self.fail_channels = true;
        self
    }

    /// Make every logistics call fail.
    pub fn with_failing_logistics(mut self) -> Self {
        self.fail_logistics = true;
        self
    }

    pub fn calls(&self) -> Arc<MockCalls> {
        self.calls.clone()
    }

    fn check_logistics(&self) -> Result<(), DataSourceError> {
        if self.fail_logistics {
            Err(DataSourceError::HttpError {
                status: 503,
                message: "logistics unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

fn pick<K, V>(source: &HashMap<K, V>, keys: &[K]) -> HashMap<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    keys.iter()
        .filter_map(|k| source.get(k).map(|v| (k.clone(), v.clone())))
        .collect()
}

#[async_trait]
impl ShopService for MockServices {
    async fn get_shops(
        &self,
        shop_ids: &[ShopId],
    ) -> Result<HashMap<ShopId, ShopInfo>, DataSourceError> {
        self.calls.get_shops.fetch_add(1, Ordering::SeqCst);
        Ok(pick(&self.shops, shop_ids))
    }
}

#[async_trait]
impl ItemService for MockServices {
    async fn get_items(
        &self,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, ItemInfo>, DataSourceError> {
        self.calls.get_items.fetch_add(1, Ordering::SeqCst);
        Ok(pick(&self.items, item_ids))
    }

    async fn get_enabled_channels(
        &self,
        items: &[ShopItemId],
    ) -> Result<HashMap<ShopItemId, Vec<Channel>>, DataSourceError> {
        self.calls.get_enabled_channels.fetch_add(1, Ordering::SeqCst);
        if self.fail_channels {
            return Err(DataSourceError::NetworkError("channel service down".to_string()));
        }
        Ok(pick(&self.channels, items))
    }
}

#[async_trait]
impl MerchantService for MockServices {
    async fn get_commission_rates(
        &self,
        shop_ids: &[ShopId],
    ) -> Result<HashMap<ShopId, CommissionRates>, DataSourceError> {
        self.calls.get_commission_rates.fetch_add(1, Ordering::SeqCst);
        Ok(pick(&self.commissions, shop_ids))
    }
}

#[async_trait]
impl LogisticsService for MockServices {
    async fn calculate_hidden_fees(
        &self,
        requests: &[HiddenFeeRequest],
    ) -> Result<Vec<FeeQuote>, DataSourceError> {
        self.calls.calculate_hidden_fees.fetch_add(1, Ordering::SeqCst);
        self.calls
            .hidden_fee_requests
            .fetch_add(requests.len(), Ordering::SeqCst);
        self.check_logistics()?;
        Ok(requests
            .iter()
            .map(|r| {
                match self.hidden_fees.get(&ShopItemId::new(r.shop_id, r.item_id)) {
                    Some(fee) => FeeQuote::ok(*fee),
                    None => FeeQuote::failed(format!("no route for item {}", r.item_id)),
                }
            })
            .collect())
    }

    async fn calculate_shipping_fees(
        &self,
        requests: &[ShippingFeeRequest],
    ) -> Result<Vec<FeeQuote>, DataSourceError> {
        self.calls.calculate_shipping_fees.fetch_add(1, Ordering::SeqCst);
        self.check_logistics()?;
        Ok(requests
            .iter()
            .map(|r| {
                match self.shipping_fees.get(&ShopItemId::new(r.shop_id, r.item_id)) {
                    Some(fee) => FeeQuote::ok(*fee),
                    None => FeeQuote::failed(format!("no shipping rate for item {}", r.item_id)),
                }
            })
            .collect())
    }

    async fn calculate_location_fees(
        &self,
        requests: &[LocationFeeRequest],
    ) -> Result<Vec<FeeQuote>, DataSourceError> {
        self.calls.calculate_location_fees.fetch_add(1, Ordering::SeqCst);
        self.check_logistics()?;
        Ok(requests
            .iter()
            .map(|r| {
                let key = (r.seller_location.clone(), r.buyer_location.clone(), r.channel_id);
                match self.location_fees.get(&key) {
                    Some(fee) => FeeQuote::ok(*fee),
                    None => FeeQuote::failed(format!(
                        "no route {} -> {}",
                        r.seller_location, r.buyer_location
                    )),
                }
            })
            .collect())
    }
}
