//! Downstream service abstraction for shop, item, merchant and logistics data.

use crate::domain::{ChannelId, ItemId, MerchantId, Region, ShopId};
use crate::ratetable::RateTableCfg;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod http;
pub mod mock;

pub use http::HttpServiceClient;
pub use mock::MockServices;

/// Shop attributes needed for pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopInfo {
    pub shop_id: ShopId,
    pub region: Region,
    #[serde(default)]
    pub merchant_id: Option<MerchantId>,
    /// Region the merchant is registered in.
    #[serde(default)]
    pub merchant_region: Option<Region>,
    /// Fulfilled by a third party (3PF).
    #[serde(default)]
    pub is_third_party_fulfilled: bool,
    #[serde(default)]
    pub rate_table_cfg: Option<RateTableCfg>,
    /// Seller warehouse locations; more than one enables multi-warehouse quoting.
    #[serde(default)]
    pub warehouse_locations: Vec<String>,
}

impl ShopInfo {
    pub fn new(shop_id: ShopId, region: Region) -> Self {
        Self {
            shop_id,
            region,
            merchant_id: None,
            merchant_region: None,
            is_third_party_fulfilled: false,
            rate_table_cfg: None,
            warehouse_locations: Vec::new(),
        }
    }
}

/// Item attributes needed for pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub item_id: ItemId,
    pub shop_id: ShopId,
    /// Fixed-point weight.
    pub weight: i64,
    #[serde(default)]
    pub rate_table_cfg: Option<RateTableCfg>,
}

/// A logistics channel enabled for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: ChannelId,
    pub cross_border: bool,
}

/// Platform fee rates for a shop, inflated by
/// `PERCENT_PRECISION_BETWEEN_MTSKU_AND_MPSKU`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRates {
    pub commission_rate: i64,
    pub transaction_fee_rate: i64,
    pub service_fee_rate: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShopItemId {
    pub shop_id: ShopId,
    pub item_id: ItemId,
}

impl ShopItemId {
    pub fn new(shop_id: ShopId, item_id: ItemId) -> Self {
        Self { shop_id, item_id }
    }
}

/// Hidden fee quote request for one item over its cross-border channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenFeeRequest {
    pub shop_id: ShopId,
    pub item_id: ItemId,
    pub region: Region,
    /// Fixed-point weight.
    pub weight: i64,
    pub channel_ids: Vec<ChannelId>,
}

/// Shipping fee quote request for one affiliate listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingFeeRequest {
    pub shop_id: ShopId,
    pub item_id: ItemId,
    pub primary_region: Region,
    pub affiliate_region: Region,
    /// Fixed-point weight.
    pub weight: i64,
}

/// Fee quote between a seller warehouse and a buyer location on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationFeeRequest {
    pub region: Region,
    pub seller_location: String,
    pub buyer_location: String,
    pub channel_id: ChannelId,
    /// Fixed-point weight.
    pub weight: i64,
}

/// One entry of a logistics batch answer, positionally matched to the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    /// Fixed-point fee.
    #[serde(default)]
    pub fee: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl FeeQuote {
    pub fn ok(fee: i64) -> Self {
        Self {
            fee: Some(fee),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            fee: None,
            error: Some(message.into()),
        }
    }

    pub fn into_result(self) -> Result<i64, String> {
        match (self.fee, self.error) {
            (_, Some(e)) => Err(e),
            (Some(fee), None) => Ok(fee),
            (None, None) => Err("empty fee quote".to_string()),
        }
    }
}

/// Shop lookups. Absent keys in the answer mean the shop does not exist.
#[async_trait]
pub trait ShopService: Send + Sync + fmt::Debug {
    async fn get_shops(
        &self,
        shop_ids: &[ShopId],
    ) -> Result<HashMap<ShopId, ShopInfo>, DataSourceError>;
}

#[async_trait]
pub trait ItemService: Send + Sync + fmt::Debug {
    async fn get_items(
        &self,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, ItemInfo>, DataSourceError>;

    /// Enabled logistics channels per item. An absent key means no channel is
    /// enabled.
    async fn get_enabled_channels(
        &self,
        items: &[ShopItemId],
    ) -> Result<HashMap<ShopItemId, Vec<Channel>>, DataSourceError>;
}

#[async_trait]
pub trait MerchantService: Send + Sync + fmt::Debug {
    async fn get_commission_rates(
        &self,
        shop_ids: &[ShopId],
    ) -> Result<HashMap<ShopId, CommissionRates>, DataSourceError>;
}

/// Logistics fee calculation. Answers are positional: entry `i` answers
/// request `i`.
#[async_trait]
pub trait LogisticsService: Send + Sync + fmt::Debug {
    async fn calculate_hidden_fees(
        &self,
        requests: &[HiddenFeeRequest],
    ) -> Result<Vec<FeeQuote>, DataSourceError>;

    async fn calculate_shipping_fees(
        &self,
        requests: &[ShippingFeeRequest],
    ) -> Result<Vec<FeeQuote>, DataSourceError>;

    async fn calculate_location_fees(
        &self,
        requests: &[LocationFeeRequest],
    ) -> Result<Vec<FeeQuote>, DataSourceError>;
}

/// Error type for downstream service calls.
#[derive(Debug, Clone)]
pub enum DataSourceError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Parsing error (invalid JSON or malformed response)
    ParseError(String),
    RateLimited,
    Other(String),
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            DataSourceError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            DataSourceError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            DataSourceError::RateLimited => write!(f, "Rate limited"),
            DataSourceError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for DataSourceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datasource_error_display() {
        let err = DataSourceError::HttpError {
            status: 503,
            message: "Server error".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error 503: Server error");
        assert_eq!(DataSourceError::RateLimited.to_string(), "Rate limited");
    }

    #[test]
    fn test_fee_quote_into_result() {
        assert_eq!(FeeQuote::ok(120).into_result(), Ok(120));
        assert!(FeeQuote::failed("no route").into_result().is_err());
        let empty = FeeQuote {
            fee: None,
            error: None,
        };
        assert!(empty.into_result().is_err());
    }

    #[test]
    fn test_shop_info_defaults_from_json() {
        let shop: ShopInfo = serde_json::from_str(r#"{"shop_id": 7, "region": "my"}"#).unwrap();
        assert_eq!(shop.region, Region::new("MY"));
        assert!(shop.merchant_region.is_none());
        assert!(!shop.is_third_party_fulfilled);
        assert!(shop.warehouse_locations.is_empty());
    }
}
