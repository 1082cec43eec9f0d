use crate::orchestration::PoolConfig;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub service_base_url: String,
    pub redis_url: Option<String>,
    pub pricing_config_path: Option<String>,
    pub worker_pool_size: usize,
    pub worker_max_wait: Duration,
    pub worker_idle_timeout: Duration,
    pub max_batch_size: usize,
    pub logistics_batch_size: usize,
    pub local_cache_ttl: Duration,
    pub remote_cache_ttl: Duration,
    pub local_cache_capacity: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = required(&env_map, "DATABASE_PATH")?;
        let service_base_url = required(&env_map, "SERVICE_BASE_URL")?;

        let redis_url = optional(&env_map, "REDIS_URL");
        let pricing_config_path = optional(&env_map, "PRICING_CONFIG_PATH");

        let worker_pool_size: usize = parse_or(&env_map, "WORKER_POOL_SIZE", 100)?;
        if worker_pool_size == 0 {
            return Err(ConfigError::InvalidValue(
                "WORKER_POOL_SIZE".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let worker_max_wait = Duration::from_millis(parse_or(&env_map, "WORKER_MAX_WAIT_MS", 3000)?);
        let worker_idle_timeout =
            Duration::from_millis(parse_or(&env_map, "WORKER_IDLE_TIMEOUT_MS", 60_000)?);

        let max_batch_size: usize = parse_or(&env_map, "MAX_BATCH_SIZE", 200)?;
        if max_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_BATCH_SIZE".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let logistics_batch_size = parse_or(&env_map, "LOGISTICS_BATCH_SIZE", 50)?;

        let local_cache_ttl = Duration::from_secs(parse_or(&env_map, "LOCAL_CACHE_TTL_SECS", 60)?);
        let remote_cache_ttl =
            Duration::from_secs(parse_or(&env_map, "REMOTE_CACHE_TTL_SECS", 600)?);
        let local_cache_capacity = parse_or(&env_map, "LOCAL_CACHE_CAPACITY", 10_000)?;

        Ok(Config {
            database_path,
            service_base_url,
            redis_url,
            pricing_config_path,
            worker_pool_size,
            worker_max_wait,
            worker_idle_timeout,
            max_batch_size,
            logistics_batch_size,
            local_cache_ttl,
            remote_cache_ttl,
            local_cache_capacity,
        })
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_workers: self.worker_pool_size,
            max_wait: self.worker_max_wait,
            idle_timeout: self.worker_idle_timeout,
        }
    }
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn optional(env_map: &HashMap<String, String>, key: &str) -> Option<String> {
    env_map
        .get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a non-negative integer".to_string())
        }),
    }
}
