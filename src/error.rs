use crate::cache::CacheError;
use crate::datasource::DataSourceError;
use crate::orchestration::pool::PoolError;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the pricing engine.
///
/// `Parameter` errors abort a whole batch; every other kind is carried inside
/// the result of the single query it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("Invalid parameter: {0}")]
    Parameter(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Marshal error: {0}")]
    Marshal(String),
    #[error("Calculate hidden fee error: {0}")]
    CalculateHiddenFee(String),
    #[error("Empty enabled channels: {0}")]
    EmptyEnabledChannels(String),
    #[error("Get enabled channels error: {0}")]
    GetEnabledChannels(String),
    #[error("Profit rate limit violated: {0}")]
    ProfitRateLimit(String),
    #[error("Invalid discount rate: {0}")]
    InvalidDiscountRate(String),
    #[error("External service error: {0}")]
    ExternalService(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Cancelled: {0}")]
    Cancelled(String),
    #[error("Busy: {0}")]
    Busy(String),
}

/// Machine-readable view of an error for the request-handling layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub code: i32,
    pub message: String,
    pub retryable: bool,
}

impl PricingError {
    /// Stable numeric code.
    pub fn code(&self) -> i32 {
        match self {
            PricingError::Parameter(_) => 100_001,
            PricingError::NotFound(_) => 100_002,
            PricingError::Cache(_) => 100_003,
            PricingError::Marshal(_) => 100_004,
            PricingError::CalculateHiddenFee(_) => 100_005,
            PricingError::EmptyEnabledChannels(_) => 100_006,
            PricingError::GetEnabledChannels(_) => 100_007,
            PricingError::ProfitRateLimit(_) => 100_008,
            PricingError::InvalidDiscountRate(_) => 100_009,
            PricingError::ExternalService(_) => 100_010,
            PricingError::Internal(_) => 100_011,
            PricingError::Cancelled(_) => 100_012,
            PricingError::Busy(_) => 100_013,
        }
    }

    /// Whether the same request may succeed when retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PricingError::ExternalService(_)
                | PricingError::Cache(_)
                | PricingError::GetEnabledChannels(_)
                | PricingError::Busy(_)
        )
    }

    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            code: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

impl From<sqlx::Error> for PricingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PricingError::NotFound("database row".to_string()),
            other => PricingError::ExternalService(format!("database: {}", other)),
        }
    }
}

impl From<DataSourceError> for PricingError {
    fn from(err: DataSourceError) -> Self {
        PricingError::ExternalService(err.to_string())
    }
}

impl From<CacheError> for PricingError {
    fn from(err: CacheError) -> Self {
        PricingError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for PricingError {
    fn from(err: serde_json::Error) -> Self {
        PricingError::Marshal(err.to_string())
    }
}

impl From<PoolError> for PricingError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Cancelled => PricingError::Cancelled(err.to_string()),
            PoolError::Timeout(_) => PricingError::Busy(err.to_string()),
            PoolError::Closed => PricingError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    fn all_kinds() -> Vec<PricingError> {
        let m = || "x".to_string();
        vec![
            PricingError::Parameter(m()),
            PricingError::NotFound(m()),
            PricingError::Cache(m()),
            PricingError::Marshal(m()),
            PricingError::CalculateHiddenFee(m()),
            PricingError::EmptyEnabledChannels(m()),
            PricingError::GetEnabledChannels(m()),
            PricingError::ProfitRateLimit(m()),
            PricingError::InvalidDiscountRate(m()),
            PricingError::ExternalService(m()),
            PricingError::Internal(m()),
            PricingError::Cancelled(m()),
            PricingError::Busy(m()),
        ]
    }

    #[test]
    fn test_codes_are_unique() {
        let codes: HashSet<i32> = all_kinds().iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), all_kinds().len());
    }

    #[test]
    fn test_retryable_classes() {
        assert!(PricingError::ExternalService("rpc".into()).is_retryable());
        assert!(PricingError::Cache("redis".into()).is_retryable());
        assert!(!PricingError::Parameter("bad".into()).is_retryable());
        assert!(!PricingError::NotFound("gone".into()).is_retryable());
    }

    #[test]
    fn test_detail_carries_code_and_message() {
        let detail = PricingError::NotFound("shop 7".into()).detail();
        assert_eq!(detail.code, 100_002);
        assert_eq!(detail.message, "Not found: shop 7");
        assert!(!detail.retryable);
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["code"], 100_002);
    }

    #[test]
    fn test_conversions() {
        let e: PricingError = sqlx::Error::RowNotFound.into();
        assert!(matches!(e, PricingError::NotFound(_)));

        let e: PricingError = DataSourceError::RateLimited.into();
        assert!(matches!(e, PricingError::ExternalService(_)));

        let e: PricingError = PoolError::Timeout(Duration::from_millis(5)).into();
        assert!(e.is_retryable());

        let e: PricingError = PoolError::Cancelled.into();
        assert!(matches!(e, PricingError::Cancelled(_)));
    }
}
