//! Batch query and result types.
//!
//! Every query carries a caller-assigned `query_id`; results come back in the
//! order the queries were submitted, each holding either a value or an error.

use super::{Decimal, ItemId, ItemModelId, MerchantId, PriceDirection, Region, ShopId};
use crate::error::{ErrorDetail, PricingError};
use serde::{Deserialize, Serialize};

/// A batch element carrying a caller-assigned id.
pub trait QueryId {
    fn query_id(&self) -> u64;
}

macro_rules! impl_query_id {
    ($($ty:ty),* $(,)?) => {
        $(impl QueryId for $ty {
            fn query_id(&self) -> u64 {
                self.query_id
            }
        })*
    };
}

impl_query_id!(
    LocalSipHiddenPriceQuery,
    LocalSipShippingFeeQuery,
    LocalSipPriceQuery,
    CbSipPriceQuery,
    GetHidePriceForCbscRequest,
    CbscPriceQuery,
    GlobalDiscountQuery,
);

/// Outcome of one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult<T> {
    pub query_id: u64,
    pub outcome: Result<T, PricingError>,
}

impl<T> QueryResult<T> {
    pub fn ok(query_id: u64, value: T) -> Self {
        Self {
            query_id,
            outcome: Ok(value),
        }
    }

    pub fn err(query_id: u64, error: PricingError) -> Self {
        Self {
            query_id,
            outcome: Err(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&PricingError> {
        self.outcome.as_ref().err()
    }
}

/// Wire view of a [`QueryResult`]: exactly one of `value` / `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResultView<T: Serialize> {
    pub query_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl<T: Serialize + Clone> From<&QueryResult<T>> for QueryResultView<T> {
    fn from(result: &QueryResult<T>) -> Self {
        match &result.outcome {
            Ok(v) => Self {
                query_id: result.query_id,
                value: Some(v.clone()),
                error: None,
            },
            Err(e) => Self {
                query_id: result.query_id,
                value: None,
                error: Some(e.detail()),
            },
        }
    }
}

/// Local SIP hidden price for one affiliate listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSipHiddenPriceQuery {
    pub query_id: u64,
    pub shop_id: ShopId,
    pub item_id: ItemId,
    pub primary_region: Region,
    pub affiliate_region: Region,
    /// Fixed-point weight.
    pub weight: i64,
}

/// Local SIP shipping fee for one affiliate listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSipShippingFeeQuery {
    pub query_id: u64,
    pub shop_id: ShopId,
    pub item_id: ItemId,
    pub primary_region: Region,
    pub affiliate_region: Region,
    /// Fixed-point weight.
    pub weight: i64,
}

/// Local SIP affiliate price from a primary price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSipPriceQuery {
    pub query_id: u64,
    pub shop_id: ShopId,
    pub item_id: ItemId,
    pub primary_region: Region,
    pub affiliate_region: Region,
    /// Fixed-point price.
    pub primary_price: i64,
    /// Fixed-point affiliate real weight.
    pub affiliate_weight: i64,
    #[serde(default)]
    pub item_margin: Option<Decimal>,
    #[serde(default)]
    pub shop_margin: Option<Decimal>,
    #[serde(default)]
    pub oversea_rate: Option<Decimal>,
}

impl LocalSipPriceQuery {
    pub fn hidden_price_query(&self) -> LocalSipHiddenPriceQuery {
        LocalSipHiddenPriceQuery {
            query_id: self.query_id,
            shop_id: self.shop_id,
            item_id: self.item_id,
            primary_region: self.primary_region.clone(),
            affiliate_region: self.affiliate_region.clone(),
            weight: self.affiliate_weight,
        }
    }
}

/// CB SIP affiliate price from a primary price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CbSipPriceQuery {
    pub query_id: u64,
    pub shop_id: ShopId,
    pub item_id: ItemId,
    pub primary_region: Region,
    pub affiliate_region: Region,
    /// Fixed-point price.
    pub primary_price: i64,
    /// Fixed-point weight.
    pub weight: i64,
    pub price_ratio: Decimal,
    pub ratio: Decimal,
    pub country_margin: Decimal,
    pub shop_margin: Decimal,
    pub item_margin: Decimal,
    pub final_fee: Decimal,
}

/// CBSC hidden price for one shop item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetHidePriceForCbscRequest {
    pub query_id: u64,
    pub merchant_id: MerchantId,
    pub shop_id: ShopId,
    pub item_id: ItemId,
    pub direction: PriceDirection,
}

/// CBSC price conversion. `Forward` turns an MTSKU price into an MPSKU price,
/// `Reverse` turns an MPSKU price back into an MTSKU price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CbscPriceQuery {
    pub query_id: u64,
    pub merchant_id: MerchantId,
    pub shop_id: ShopId,
    pub item_model: ItemModelId,
    /// Fixed-point source price.
    pub price: i64,
    pub direction: PriceDirection,
}

/// Global discount between an MTSKU price and an MPSKU price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalDiscountQuery {
    pub query_id: u64,
    pub item_model: ItemModelId,
    /// Fixed-point MTSKU price.
    pub mtsku_price: i64,
    pub target: DiscountTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum DiscountTarget {
    /// Derive the MPSKU price from a discount rate inflated by
    /// `PERCENT_PRECISION_BETWEEN_MTSKU_AND_MPSKU`.
    PriceFromRate(i64),
    /// Derive the discount rate from a fixed-point MPSKU price.
    RateFromPrice(i64),
}

/// Answer to a [`GlobalDiscountQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalDiscountResult {
    /// Fixed-point MPSKU price.
    pub mpsku_price: i64,
    /// Discount rate in the inflated percent space, two decimals.
    pub discount_rate: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_result_is_value_or_error() {
        let ok: QueryResult<i64> = QueryResult::ok(1, 5);
        assert!(ok.is_ok());
        assert_eq!(ok.value(), Some(&5));
        assert!(ok.error().is_none());

        let err: QueryResult<i64> = QueryResult::err(2, PricingError::NotFound("x".into()));
        assert!(!err.is_ok());
        assert!(err.value().is_none());
        assert_eq!(err.error().unwrap().code(), 100_002);
    }

    #[test]
    fn test_result_view_serializes_one_side() {
        let ok: QueryResult<i64> = QueryResult::ok(1, 4573000);
        let json = serde_json::to_value(QueryResultView::from(&ok)).unwrap();
        assert_eq!(json["value"], 4573000);
        assert!(json.get("error").is_none());

        let err: QueryResult<i64> = QueryResult::err(2, PricingError::Parameter("p".into()));
        let json = serde_json::to_value(QueryResultView::from(&err)).unwrap();
        assert!(json.get("value").is_none());
        assert_eq!(json["error"]["code"], 100_001);
    }

    #[test]
    fn test_discount_target_serialization() {
        let json = serde_json::to_value(DiscountTarget::PriceFromRate(2500)).unwrap();
        assert_eq!(json["kind"], "price_from_rate");
        assert_eq!(json["value"], 2500);
    }
}
