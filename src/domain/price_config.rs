//! Read-only pricing configuration.
//!
//! The whole rule set is held in an immutable [`PricingSnapshot`]; a
//! [`SnapshotStore`] swaps in replacements atomically so in-flight batches
//! keep the snapshot they started with.

use super::{CurrencyRule, Decimal, Region, RegionPair};
use crate::ratetable::{DefaultRateTable, RateTable, RateTableCascade, RateTableCfg};
use crate::ratetable::{ConfigLevel, RateTableError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Where a fee comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeSourceToggle {
    /// Persisted bracket tables.
    #[default]
    Static,
    /// Computed by the logistics service.
    Logistics,
}

/// Pricing parameters for one (primary, affiliate) region pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonPriceConfig {
    pub primary_region: Region,
    pub affiliate_region: Region,
    /// Region margin.
    #[serde(default)]
    pub buffer: Option<Decimal>,
    #[serde(default)]
    pub exchange_rate: Option<Decimal>,
    #[serde(default)]
    pub init_hidden_price: Option<Decimal>,
    #[serde(default)]
    pub hidden_fee_source: FeeSourceToggle,
    #[serde(default)]
    pub shipping_fee_source: FeeSourceToggle,
    /// Buyer location used when quoting multi-warehouse logistics fees.
    #[serde(default)]
    pub buyer_location: Option<String>,
}

impl CommonPriceConfig {
    pub fn new(primary_region: Region, affiliate_region: Region) -> Self {
        Self {
            primary_region,
            affiliate_region,
            buffer: None,
            exchange_rate: None,
            init_hidden_price: None,
            hidden_fee_source: FeeSourceToggle::Static,
            shipping_fee_source: FeeSourceToggle::Static,
            buyer_location: None,
        }
    }

    /// Buffer, or 1 when absent or non-positive.
    pub fn effective_buffer(&self) -> Decimal {
        match self.buffer {
            Some(b) if b.is_positive() => b,
            _ => Decimal::one(),
        }
    }

    /// Exchange rate, or 1 when absent or zero.
    pub fn effective_exchange_rate(&self) -> Decimal {
        match self.exchange_rate {
            Some(r) if !r.is_zero() => r,
            _ => Decimal::one(),
        }
    }

    pub fn region_pair(&self) -> RegionPair {
        RegionPair::new(self.primary_region.clone(), self.affiliate_region.clone())
    }
}

/// Named rate table as it appears in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateTableFile {
    pub key: String,
    pub rows: Vec<HashMap<String, String>>,
}

/// Region-level rate table config as it appears in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionRateTableFile {
    pub merchant_region: Region,
    pub primary_region: Region,
    #[serde(flatten)]
    pub cfg: RateTableCfg,
}

/// On-disk / on-wire shape of the pricing rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingConfigFile {
    #[serde(default)]
    pub common_price_configs: Vec<CommonPriceConfig>,
    #[serde(default)]
    pub currencies: HashMap<Region, CurrencyRule>,
    #[serde(default)]
    pub rate_tables: Vec<RateTableFile>,
    #[serde(default)]
    pub region_rate_tables: Vec<RegionRateTableFile>,
    #[serde(default)]
    pub default_hidden_fee_table: Vec<HashMap<String, String>>,
}

/// Immutable, indexed pricing rules.
#[derive(Debug, Clone, Default)]
pub struct PricingSnapshot {
    price_configs: HashMap<RegionPair, CommonPriceConfig>,
    currencies: HashMap<Region, CurrencyRule>,
    rate_tables: RateTableCascade,
}

impl PricingSnapshot {
    /// Build a snapshot from its file form.
    ///
    /// A malformed named table is an error. A malformed or incomplete default
    /// table is logged and left out, so lookups fall through to "not found".
    pub fn from_file(file: PricingConfigFile) -> Result<Self, RateTableError> {
        let tables = file
            .rate_tables
            .iter()
            .map(|t| RateTable::parse(&t.key, ConfigLevel::Table, &t.rows))
            .collect::<Result<Vec<_>, _>>()?;

        let region_cfgs = file
            .region_rate_tables
            .into_iter()
            .map(|r| (RegionPair::new(r.merchant_region, r.primary_region), r.cfg))
            .collect();

        let default_table = if file.default_hidden_fee_table.is_empty() {
            warn!("no default hidden fee table configured");
            None
        } else {
            match DefaultRateTable::parse(&file.default_hidden_fee_table) {
                Ok(table) => Some(table),
                Err(e) => {
                    warn!(error = %e, "default hidden fee table rejected");
                    None
                }
            }
        };

        let price_configs = file
            .common_price_configs
            .into_iter()
            .map(|c| (c.region_pair(), c))
            .collect::<HashMap<_, _>>();

        info!(
            price_configs = price_configs.len(),
            rate_tables = tables.len(),
            "pricing snapshot built"
        );

        Ok(Self {
            price_configs,
            currencies: file.currencies,
            rate_tables: RateTableCascade::new(tables, region_cfgs, default_table),
        })
    }

    /// Parse a snapshot from JSON text.
    pub fn from_json_str(raw: &str) -> Result<Self, SnapshotError> {
        let file: PricingConfigFile = serde_json::from_str(raw)?;
        Ok(Self::from_file(file)?)
    }

    pub fn price_config(&self, primary: &Region, affiliate: &Region) -> Option<&CommonPriceConfig> {
        self.price_configs
            .get(&RegionPair::new(primary.clone(), affiliate.clone()))
    }

    /// Currency rule for a region, defaulting to two decimals with plain
    /// round-up.
    pub fn currency(&self, region: &Region) -> CurrencyRule {
        self.currencies.get(region).copied().unwrap_or_default()
    }

    pub fn rate_tables(&self) -> &RateTableCascade {
        &self.rate_tables
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("invalid pricing config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    RateTable(#[from] RateTableError),
}

/// Atomically replaceable holder of the current snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    tx: Arc<watch::Sender<Arc<PricingSnapshot>>>,
}

impl SnapshotStore {
    pub fn new(initial: PricingSnapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// The snapshot in effect right now.
    pub fn current(&self) -> Arc<PricingSnapshot> {
        self.tx.borrow().clone()
    }

    /// Replace the snapshot; readers holding the old one are unaffected.
    pub fn publish(&self, snapshot: PricingSnapshot) {
        self.tx.send_replace(Arc::new(snapshot));
        info!("pricing snapshot replaced");
    }

    /// Subscribe to replacements.
    pub fn subscribe(&self) -> watch::Receiver<Arc<PricingSnapshot>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_effective_buffer_defaults() {
        let mut cfg = CommonPriceConfig::new(Region::new("SG"), Region::new("MY"));
        assert_eq!(cfg.effective_buffer(), Decimal::one());
        cfg.buffer = Some(d("-0.5"));
        assert_eq!(cfg.effective_buffer(), Decimal::one());
        cfg.buffer = Some(Decimal::zero());
        assert_eq!(cfg.effective_buffer(), Decimal::one());
        cfg.buffer = Some(d("1.22"));
        assert_eq!(cfg.effective_buffer(), d("1.22"));
    }

    #[test]
    fn test_effective_exchange_rate_defaults() {
        let mut cfg = CommonPriceConfig::new(Region::new("SG"), Region::new("MY"));
        assert_eq!(cfg.effective_exchange_rate(), Decimal::one());
        cfg.exchange_rate = Some(Decimal::zero());
        assert_eq!(cfg.effective_exchange_rate(), Decimal::one());
        cfg.exchange_rate = Some(d("3400"));
        assert_eq!(cfg.effective_exchange_rate(), d("3400"));
    }

    #[test]
    fn test_snapshot_from_json() {
        let raw = r#"{
            "common_price_configs": [
                {"primary_region": "sg", "affiliate_region": "my", "buffer": "1.22",
                 "hidden_fee_source": "logistics", "buyer_location": "KUL"}
            ],
            "currencies": {"MY": {"decimal_places": 2, "use_special_roundup": true}},
            "rate_tables": [
                {"key": "t1", "rows": [{"weight_range": "inf", "start_price": "1", "start_weight": "0",
                  "round_size": "0", "price": "0", "weight_step": "1", "adjustment": "0"}]}
            ],
            "region_rate_tables": [
                {"merchant_region": "CN", "primary_region": "SG", "affi_keys": {"MY": "t1"}}
            ]
        }"#;
        let snapshot = PricingSnapshot::from_json_str(raw).unwrap();
        let cfg = snapshot
            .price_config(&Region::new("SG"), &Region::new("MY"))
            .unwrap();
        assert_eq!(cfg.effective_buffer(), d("1.22"));
        assert_eq!(cfg.hidden_fee_source, FeeSourceToggle::Logistics);
        assert_eq!(cfg.shipping_fee_source, FeeSourceToggle::Static);
        assert!(snapshot.currency(&Region::new("MY")).use_special_roundup);
        assert_eq!(snapshot.currency(&Region::new("TH")), CurrencyRule::default());
        assert!(!snapshot.rate_tables().has_default_table());
    }

    #[test]
    fn test_snapshot_rejects_bad_named_table() {
        let raw = r#"{"rate_tables": [{"key": "t1", "rows": [{"weight_range": "x"}]}]}"#;
        assert!(matches!(
            PricingSnapshot::from_json_str(raw),
            Err(SnapshotError::RateTable(_))
        ));
    }

    #[test]
    fn test_store_publish_replaces_snapshot() {
        let store = SnapshotStore::new(PricingSnapshot::default());
        let before = store.current();
        assert!(before
            .price_config(&Region::new("SG"), &Region::new("MY"))
            .is_none());

        let file = PricingConfigFile {
            common_price_configs: vec![CommonPriceConfig::new(Region::new("SG"), Region::new("MY"))],
            ..Default::default()
        };
        store.publish(PricingSnapshot::from_file(file).unwrap());

        assert!(store
            .current()
            .price_config(&Region::new("SG"), &Region::new("MY"))
            .is_some());
        // The old Arc is unchanged.
        assert!(before
            .price_config(&Region::new("SG"), &Region::new("MY"))
            .is_none());
    }
}
