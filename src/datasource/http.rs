//! JSON-over-HTTP client for the downstream services.

use super::{
    Channel, CommissionRates, DataSourceError, FeeQuote, HiddenFeeRequest, ItemInfo, ItemService,
    LocationFeeRequest, LogisticsService, MerchantService, ShippingFeeRequest, ShopInfo,
    ShopItemId, ShopService,
};
use crate::domain::{ItemId, ShopId};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Cap on the total time spent retrying one call.
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(10);

/// Client for the shop, item, merchant and logistics endpoints behind one
/// gateway.
#[derive(Debug, Clone)]
pub struct HttpServiceClient {
    client: Client,
    base_url: String,
}

impl HttpServiceClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post_json(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, DataSourceError> {
        let url = format!("{}{}", self.base_url, path);
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(MAX_RETRY_ELAPSED),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| {
                    backoff::Error::transient(DataSourceError::NetworkError(e.to_string()))
                })?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(DataSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(DataSourceError::ParseError(e.to_string())))
        })
        .await
    }
}

fn data_array(response: &serde_json::Value) -> Result<&Vec<serde_json::Value>, DataSourceError> {
    response
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| DataSourceError::ParseError("Expected data array".to_string()))
}

/// Decode `data` entries, skipping (and logging) malformed ones.
fn decode_entries<T: DeserializeOwned>(
    response: &serde_json::Value,
    what: &str,
) -> Result<Vec<T>, DataSourceError> {
    let mut out = Vec::new();
    for entry in data_array(response)? {
        match T::deserialize(entry) {
            Ok(v) => out.push(v),
            Err(e) => warn!(entity = what, error = %e, "Failed to parse entry"),
        }
    }
    Ok(out)
}

/// Decode positional fee quotes; a malformed entry becomes a failed quote so
/// positions stay aligned.
fn decode_quotes(response: &serde_json::Value) -> Result<Vec<FeeQuote>, DataSourceError> {
    Ok(data_array(response)?
        .iter()
        .map(|entry| {
            FeeQuote::deserialize(entry)
                .unwrap_or_else(|e| FeeQuote::failed(format!("malformed quote: {}", e)))
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct ChannelEntry {
    shop_id: ShopId,
    item_id: ItemId,
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct CommissionEntry {
    shop_id: ShopId,
    #[serde(flatten)]
    rates: CommissionRates,
}

#[async_trait]
impl ShopService for HttpServiceClient {
    async fn get_shops(
        &self,
        shop_ids: &[ShopId],
    ) -> Result<HashMap<ShopId, ShopInfo>, DataSourceError> {
        debug!(count = shop_ids.len(), "Fetching shops");
        let response = self
            .post_json("/shop/get_shops", serde_json::json!({ "shop_ids": shop_ids }))
            .await?;
        Ok(decode_entries::<ShopInfo>(&response, "shop")?
            .into_iter()
            .map(|s| (s.shop_id, s))
            .collect())
    }
}

#[async_trait]
impl ItemService for HttpServiceClient {
    async fn get_items(
        &self,
        item_ids: &[ItemId],
    ) -> Result<HashMap<ItemId, ItemInfo>, DataSourceError> {
        debug!(count = item_ids.len(), "Fetching items");
        let response = self
            .post_json("/item/get_items", serde_json::json!({ "item_ids": item_ids }))
            .await?;
        Ok(decode_entries::<ItemInfo>(&response, "item")?
            .into_iter()
            .map(|i| (i.item_id, i))
            .collect())
    }

    async fn get_enabled_channels(
        &self,
        items: &[ShopItemId],
    ) -> Result<HashMap<ShopItemId, Vec<Channel>>, DataSourceError> {
        debug!(count = items.len(), "Fetching enabled channels");
        let response = self
            .post_json(
                "/item/get_enabled_channels",
                serde_json::json!({ "items": items }),
            )
            .await?;
        Ok(decode_entries::<ChannelEntry>(&response, "channels")?
            .into_iter()
            .map(|e| (ShopItemId::new(e.shop_id, e.item_id), e.channels))
            .collect())
    }
}

#[async_trait]
impl MerchantService for HttpServiceClient {
    async fn get_commission_rates(
        &self,
        shop_ids: &[ShopId],
    ) -> Result<HashMap<ShopId, CommissionRates>, DataSourceError> {
        debug!(count = shop_ids.len(), "Fetching commission rates");
        let response = self
            .post_json(
                "/merchant/get_commission_rates",
                serde_json::json!({ "shop_ids": shop_ids }),
            )
            .await?;
        Ok(decode_entries::<CommissionEntry>(&response, "commission")?
            .into_iter()
            .map(|e| (e.shop_id, e.rates))
            .collect())
    }
}

#[async_trait]
impl LogisticsService for HttpServiceClient {
    async fn calculate_hidden_fees(
        &self,
        requests: &[HiddenFeeRequest],
    ) -> Result<Vec<FeeQuote>, DataSourceError> {
        let response = self
            .post_json(
                "/logistics/calculate_hidden_fees",
                serde_json::json!({ "requests": requests }),
            )
            .await?;
        decode_quotes(&response)
    }

    async fn calculate_shipping_fees(
        &self,
        requests: &[ShippingFeeRequest],
    ) -> Result<Vec<FeeQuote>, DataSourceError> {
        let response = self
            .post_json(
                "/logistics/calculate_shipping_fees",
                serde_json::json!({ "requests": requests }),
            )
            .await?;
        decode_quotes(&response)
    }

    async fn calculate_location_fees(
        &self,
        requests: &[LocationFeeRequest],
    ) -> Result<Vec<FeeQuote>, DataSourceError> {
        let response = self
            .post_json(
                "/logistics/calculate_location_fees",
                serde_json::json!({ "requests": requests }),
            )
            .await?;
        decode_quotes(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Region;

    #[test]
    fn test_decode_entries_skips_malformed() {
        let response = serde_json::json!({
            "data": [
                {"shop_id": 1, "region": "SG", "merchant_id": 9},
                {"region": "MY"}
            ]
        });
        let shops: Vec<ShopInfo> = decode_entries(&response, "shop").unwrap();
        assert_eq!(shops.len(), 1);
        assert_eq!(shops[0].region, Region::new("SG"));
        assert_eq!(shops[0].merchant_id, Some(9));
    }

    #[test]
    fn test_decode_requires_data_array() {
        let response = serde_json::json!({"error": "boom"});
        let result: Result<Vec<ShopInfo>, _> = decode_entries(&response, "shop");
        assert!(matches!(result, Err(DataSourceError::ParseError(_))));
    }

    #[test]
    fn test_decode_quotes_keeps_positions() {
        let response = serde_json::json!({
            "data": [{"fee": 120000}, {"fee": "bad"}, {"error": "no route"}]
        });
        let quotes = decode_quotes(&response).unwrap();
        assert_eq!(quotes.len(), 3);
        assert_eq!(quotes[0].clone().into_result(), Ok(120000));
        assert!(quotes[1].clone().into_result().is_err());
        assert!(quotes[2].clone().into_result().is_err());
    }

    #[test]
    fn test_commission_entry_flattened() {
        let entry: CommissionEntry = serde_json::from_value(serde_json::json!({
            "shop_id": 3, "commission_rate": 500, "transaction_fee_rate": 200, "service_fee_rate": 300
        }))
        .unwrap();
        assert_eq!(entry.shop_id, 3);
        assert_eq!(entry.rates.service_fee_rate, 300);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HttpServiceClient::new("http://gateway/".to_string());
        assert_eq!(client.base_url, "http://gateway");
    }
}
