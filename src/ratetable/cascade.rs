//! Item → shop → region → default cascade for hidden-fee rate tables.

use super::{ConfigLevel, DefaultRateTable, HiddenPriceConf, RateTable, RateTableCfg};
use crate::domain::numeric::gram_to_db_weight;
use crate::domain::{Decimal, Region, RegionPair};
use crate::error::PricingError;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Merchant region assumed when a shop has none.
pub const DEFAULT_MERCHANT_REGION: &str = "CN";

/// Inputs for one hidden-fee lookup.
#[derive(Debug, Clone)]
pub struct HiddenFeeLookup<'a> {
    pub item_cfg: Option<&'a RateTableCfg>,
    pub shop_cfg: Option<&'a RateTableCfg>,
    pub merchant_region: Option<&'a Region>,
    pub primary_region: &'a Region,
    pub affiliate_region: &'a Region,
    pub weight_grams: Decimal,
}

/// A hidden fee together with the bracket row that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHiddenFee {
    pub fee: Decimal,
    pub conf: HiddenPriceConf,
}

/// All rate-table configuration needed by the cascade.
#[derive(Debug, Clone, Default)]
pub struct RateTableCascade {
    tables: HashMap<String, RateTable>,
    /// Keyed by (merchant region, primary region).
    region_cfgs: HashMap<RegionPair, RateTableCfg>,
    default_table: Option<DefaultRateTable>,
}

impl RateTableCascade {
    pub fn new(
        tables: impl IntoIterator<Item = RateTable>,
        region_cfgs: HashMap<RegionPair, RateTableCfg>,
        default_table: Option<DefaultRateTable>,
    ) -> Self {
        Self {
            tables: tables
                .into_iter()
                .map(|t| (t.key().to_string(), t))
                .collect(),
            region_cfgs,
            default_table,
        }
    }

    pub fn has_default_table(&self) -> bool {
        self.default_table.is_some()
    }

    /// Resolve the bracket row for a lookup, first hit wins.
    pub fn resolve_conf(&self, lookup: &HiddenFeeLookup<'_>) -> Option<HiddenPriceConf> {
        let weight = gram_to_db_weight(lookup.weight_grams);
        let primary = lookup.primary_region;
        let affiliate = lookup.affiliate_region;

        let levels = [
            (ConfigLevel::Item, lookup.item_cfg),
            (ConfigLevel::Shop, lookup.shop_cfg),
            (ConfigLevel::Region, self.region_cfg(lookup)),
        ];
        for (level, cfg) in levels {
            let Some(key) = cfg.and_then(|c| c.key_for(primary, affiliate)) else {
                continue;
            };
            match self.tables.get(key) {
                Some(table) => {
                    if let Some(row) = table.select(weight) {
                        debug!(?level, hpfn_key = key, weight, "hidden fee bracket resolved");
                        return Some(with_level(row, level));
                    }
                    debug!(?level, hpfn_key = key, weight, "no bracket covers weight");
                }
                None => {
                    warn!(?level, hpfn_key = key, "rate table key not loaded, falling through");
                }
            }
        }

        let row = self
            .default_table
            .as_ref()
            .and_then(|t| t.table(affiliate))
            .and_then(|t| t.select(weight))?;
        Some(with_level(row, ConfigLevel::Default))
    }

    /// Resolve and evaluate the hidden fee for a lookup. `Ok(None)` when no
    /// level has a bracket for it.
    pub fn resolve(
        &self,
        lookup: &HiddenFeeLookup<'_>,
    ) -> Result<Option<ResolvedHiddenFee>, PricingError> {
        let Some(conf) = self.resolve_conf(lookup) else {
            return Ok(None);
        };
        let fee = conf.compute_fee(lookup.weight_grams)?;
        Ok(Some(ResolvedHiddenFee { fee, conf }))
    }

    fn region_cfg(&self, lookup: &HiddenFeeLookup<'_>) -> Option<&RateTableCfg> {
        let merchant = lookup
            .merchant_region
            .filter(|r| !r.is_empty())
            .cloned()
            .unwrap_or_else(|| Region::new(DEFAULT_MERCHANT_REGION));
        self.region_cfgs
            .get(&RegionPair::new(merchant, lookup.primary_region.clone()))
    }
}

fn with_level(row: &HiddenPriceConf, level: ConfigLevel) -> HiddenPriceConf {
    let mut conf = row.clone();
    conf.level = level;
    conf
}
