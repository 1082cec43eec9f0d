//! Domain types and the numeric layer for cross-region pricing.
//!
//! This module provides:
//! - Lossless numeric handling via the Decimal wrapper
//! - Fixed-point conversions and currency rounding
//! - Domain primitives: Region, ItemModelId, PriceDirection
//! - The read-only pricing configuration snapshot
//! - Batch query and result types

pub mod currency;
pub mod decimal;
pub mod numeric;
pub mod price_config;
pub mod primitives;
pub mod query;

pub use currency::CurrencyRule;
pub use decimal::Decimal;
pub use price_config::{
    CommonPriceConfig, FeeSourceToggle, PricingConfigFile, PricingSnapshot, SnapshotStore,
};
pub use primitives::{
    ChannelId, ItemId, ItemModelId, MerchantId, ModelId, PriceDirection, Region, RegionPair,
    ShopId,
};
pub use query::{
    CbSipPriceQuery, CbscPriceQuery, DiscountTarget, GetHidePriceForCbscRequest,
    GlobalDiscountQuery, GlobalDiscountResult, LocalSipHiddenPriceQuery, LocalSipPriceQuery,
    LocalSipShippingFeeQuery, QueryId, QueryResult, QueryResultView,
};
