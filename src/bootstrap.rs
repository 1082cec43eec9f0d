//! Wiring of the pricing service from its configuration.

use crate::cache::{CacheError, LocalCache, RedisCache};
use crate::config::Config;
use crate::datasource::{CommissionRates, HttpServiceClient, ItemInfo, ShopInfo};
use crate::db::{init_db, ProfitRateLimit, Repository};
use crate::domain::price_config::SnapshotError;
use crate::domain::{
    Decimal, ItemId, MerchantId, PricingSnapshot, RegionPair, ShopId, SnapshotStore,
};
use crate::orchestration::{BatchOrchestrator, PoolHandle};
use crate::resolver::sources::{
    CommissionSource, ExchangeRateSource, ItemInfoSource, ProfitRateLimitSource,
    ProfitRateSource, ShopInfoSource,
};
use crate::resolver::{
    CacheLayers, CbSipResolver, CbscResolver, HiddenFeeKey, LocalSipResolver,
    LogisticsHiddenFeeSource, MerchantShopKey,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

const REDIS_PREFIX: &str = "sip-pricing:";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("remote cache: {0}")]
    Cache(#[from] CacheError),
    #[error("pricing config {0}: {1}")]
    ConfigFile(String, std::io::Error),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Read the pricing rules file, or start from an empty rule set when no
/// path is configured.
pub async fn load_snapshot(path: Option<&str>) -> Result<PricingSnapshot, BootstrapError> {
    let Some(path) = path else {
        info!("no pricing config file, starting with empty rules");
        return Ok(PricingSnapshot::default());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| BootstrapError::ConfigFile(path.to_string(), e))?;
    let snapshot = PricingSnapshot::from_json_str(&raw)?;
    info!(path, "pricing config loaded");
    Ok(snapshot)
}

/// Cache tiers from configuration: the in-process tier always, Redis when
/// a URL is set.
pub async fn cache_layers(config: &Config) -> Result<CacheLayers, BootstrapError> {
    let mut layers = CacheLayers::new().with_tier(
        Arc::new(LocalCache::new(config.local_cache_capacity)),
        config.local_cache_ttl,
    );
    if let Some(url) = &config.redis_url {
        let remote = RedisCache::connect(url, REDIS_PREFIX).await?;
        layers = layers.with_tier(Arc::new(remote), config.remote_cache_ttl);
        info!("remote cache tier enabled");
    }
    Ok(layers)
}

/// Assemble the database, cache tiers, downstream client and resolvers
/// behind a ready orchestrator.
pub async fn build_orchestrator(
    config: &Config,
    snapshot: PricingSnapshot,
) -> Result<BatchOrchestrator, BootstrapError> {
    let pool = init_db(&config.database_path).await?;
    let repo = Arc::new(Repository::new(pool));
    let client = Arc::new(HttpServiceClient::new(config.service_base_url.clone()));
    let layers = cache_layers(config).await?;

    let shops = layers.wrap::<ShopId, ShopInfo>(Arc::new(ShopInfoSource::new(client.clone())), "shop");
    let items = layers.wrap::<ItemId, ItemInfo>(Arc::new(ItemInfoSource::new(client.clone())), "item");
    let commissions = layers.wrap::<ShopId, CommissionRates>(
        Arc::new(CommissionSource::new(client.clone())),
        "commission",
    );
    let exchange_rates = layers.wrap::<RegionPair, Decimal>(
        Arc::new(ExchangeRateSource::new(repo.clone())),
        "fx",
    );
    let profit_rates = layers.wrap::<MerchantShopKey, i64>(
        Arc::new(ProfitRateSource::new(repo.clone())),
        "profit_rate",
    );
    let profit_limits = layers.wrap::<MerchantId, ProfitRateLimit>(
        Arc::new(ProfitRateLimitSource::new(repo.clone())),
        "profit_rate_limit",
    );
    let hidden_fees = layers.wrap::<HiddenFeeKey, Decimal>(
        Arc::new(LogisticsHiddenFeeSource::new(
            shops.clone(),
            items.clone(),
            client.clone(),
            client.clone(),
            config.logistics_batch_size,
        )),
        "hidden_fee",
    );

    let local_sip = LocalSipResolver::new(
        repo.clone(),
        shops.clone(),
        client.clone(),
        client,
        config.logistics_batch_size,
    );
    let cb_sip = CbSipResolver::new(shops.clone(), items, exchange_rates.clone());
    let cbsc = CbscResolver::new(
        shops,
        commissions,
        exchange_rates,
        profit_rates,
        profit_limits,
        hidden_fees,
        repo,
    );

    info!(
        workers = config.worker_pool_size,
        max_batch_size = config.max_batch_size,
        "pricing orchestrator ready"
    );
    Ok(BatchOrchestrator::new(
        PoolHandle::new(config.pool_config()),
        SnapshotStore::new(snapshot),
        local_sip,
        cb_sip,
        cbsc,
        config.max_batch_size,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        let mut env = HashMap::new();
        env.insert(
            "DATABASE_PATH".to_string(),
            dir.path().join("pricing.db").to_string_lossy().to_string(),
        );
        env.insert("SERVICE_BASE_URL".to_string(), "http://127.0.0.1:1".to_string());
        Config::from_env_map(env).unwrap()
    }

    #[tokio::test]
    async fn test_load_snapshot_without_path_is_empty() {
        let snapshot = load_snapshot(None).await.unwrap();
        assert!(snapshot.price_config(&"SG".into(), &"MY".into()).is_none());
    }

    #[tokio::test]
    async fn test_load_snapshot_missing_file() {
        let err = load_snapshot(Some("/nonexistent/rules.json")).await.unwrap_err();
        assert!(matches!(err, BootstrapError::ConfigFile(_, _)));
    }

    #[tokio::test]
    async fn test_load_snapshot_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{"common_price_configs": [{"primary_region": "SG", "affiliate_region": "MY"}]}"#,
        )
        .unwrap();
        let snapshot = load_snapshot(path.to_str()).await.unwrap();
        assert!(snapshot.price_config(&"SG".into(), &"MY".into()).is_some());
    }

    #[tokio::test]
    async fn test_build_orchestrator_without_redis() {
        let dir = TempDir::new().unwrap();
        let orchestrator = build_orchestrator(&config(&dir), PricingSnapshot::default())
            .await
            .unwrap();
        assert_eq!(orchestrator.pool().current().config().max_workers, 100);
    }
}
