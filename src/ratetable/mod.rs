//! Weight-bracketed hidden-fee rate tables (HPFN).
//!
//! This module provides:
//! - `HiddenPriceConf` bracket rows and the per-row fee formula
//! - `RateTable`: rows sorted by bracket ceiling with a ceiling search
//! - Parsing of list-of-maps config rows with string-encoded numbers
//! - The item → shop → region → default cascade (`cascade`)

use crate::domain::numeric::{gram_to_db_weight, INF_WEIGHT};
use crate::domain::{Decimal, Region};
use crate::error::PricingError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub mod cascade;
pub mod default_table;

pub use cascade::{HiddenFeeLookup, RateTableCascade, ResolvedHiddenFee};
pub use default_table::{DefaultRateTable, DEFAULT_TABLE_REGIONS};

/// Largest accepted `|round_size|`.
const MAX_ROUND_SIZE: i32 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateTableError {
    #[error("rate table row {row}: missing field {field}")]
    MissingField { row: usize, field: &'static str },
    #[error("rate table row {row}: invalid {field} value {value:?}")]
    InvalidField {
        row: usize,
        field: &'static str,
        value: String,
    },
    #[error("default rate table missing regions: {0:?}")]
    MissingRegions(Vec<String>),
    #[error("rate table {0} has no rows")]
    Empty(String),
}

/// Configuration level a bracket row was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLevel {
    Item,
    Shop,
    Region,
    Default,
    /// Row read directly from a persisted bracket table.
    Table,
}

/// One bracket row of a hidden-fee rate table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenPriceConf {
    /// Bracket ceiling as fixed-point weight; [`INF_WEIGHT`] for unbounded.
    pub weight_range: i64,
    pub start_price: Decimal,
    /// Grams.
    pub start_weight: Decimal,
    /// `> 0`: round to `10^-round_size` grams; `<= 0`: round to
    /// `10^-round_size` grams as a whole-gram multiple.
    pub round_size: i32,
    /// Increment per weight step.
    pub price: Decimal,
    /// Grams.
    pub weight_step: Decimal,
    pub adjustment: Decimal,
    pub hpfn_key: String,
    pub level: ConfigLevel,
}

impl HiddenPriceConf {
    /// Fee for a parcel of `weight_grams`, never negative. Arithmetic that
    /// leaves the decimal range is an `Internal` error naming the table.
    pub fn compute_fee(&self, weight_grams: Decimal) -> Result<Decimal, PricingError> {
        self.try_compute_fee(weight_grams).ok_or_else(|| {
            PricingError::Internal(format!(
                "hidden fee overflow in table {:?} at {}g",
                self.hpfn_key, weight_grams
            ))
        })
    }

    fn try_compute_fee(&self, weight_grams: Decimal) -> Option<Decimal> {
        let round_size = self.round_size.clamp(-MAX_ROUND_SIZE, MAX_ROUND_SIZE);
        let (start_weight, weight, weight_step, round) = if round_size > 0 {
            let scale = Decimal::pow10(round_size as u32);
            (
                self.start_weight.checked_mul(scale)?,
                weight_grams.checked_mul(scale)?,
                self.weight_step.checked_mul(scale)?,
                Decimal::one(),
            )
        } else {
            (
                self.start_weight,
                weight_grams,
                self.weight_step,
                Decimal::pow10(round_size.unsigned_abs()),
            )
        };

        let bracket = round_up(start_weight, round, weight)?;
        let steps = if weight_step.is_positive() {
            bracket
                .checked_sub(start_weight)?
                .checked_div(weight_step)?
                .trunc()
        } else {
            Decimal::zero()
        };

        let fee = self
            .start_price
            .checked_add(steps.checked_mul(self.price)?)?
            .checked_add(self.adjustment)?;
        Some(fee.max(Decimal::zero()))
    }
}

/// `min` when `value <= min`, otherwise `value` rounded up to the next
/// multiple of `round_size`. `None` on overflow.
pub fn round_up(min: Decimal, round_size: Decimal, value: Decimal) -> Option<Decimal> {
    if value <= min {
        return Some(min);
    }
    if !round_size.is_positive() {
        return Some(value);
    }
    value.checked_div(round_size)?.ceil().checked_mul(round_size)
}

/// A named table of bracket rows, sorted ascending by `weight_range`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateTable {
    key: String,
    rows: Vec<HiddenPriceConf>,
}

impl RateTable {
    pub fn new(key: impl Into<String>, mut rows: Vec<HiddenPriceConf>) -> Self {
        rows.sort_by_key(|r| r.weight_range);
        Self {
            key: key.into(),
            rows,
        }
    }

    /// Parse a named table from config rows.
    pub fn parse(
        key: &str,
        level: ConfigLevel,
        rows: &[HashMap<String, String>],
    ) -> Result<Self, RateTableError> {
        if rows.is_empty() {
            return Err(RateTableError::Empty(key.to_string()));
        }
        let parsed = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| parse_row(idx, row, key, level))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(key, parsed))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn rows(&self) -> &[HiddenPriceConf] {
        &self.rows
    }

    /// First row whose `weight_range >= weight` (fixed-point weight).
    pub fn select(&self, weight: i64) -> Option<&HiddenPriceConf> {
        let idx = self.rows.partition_point(|r| r.weight_range < weight);
        self.rows.get(idx)
    }
}

/// Which rate tables apply to a primary item or shop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTableCfg {
    /// Table for the primary's own region.
    #[serde(default)]
    pub mst_key: Option<String>,
    /// Tables per affiliate region.
    #[serde(default)]
    pub affi_keys: HashMap<Region, String>,
}

impl RateTableCfg {
    pub fn key_for(&self, primary: &Region, affiliate: &Region) -> Option<&str> {
        if primary == affiliate {
            self.mst_key.as_deref()
        } else {
            self.affi_keys.get(affiliate).map(String::as_str)
        }
    }
}

/// Parse a `weight_range` cell: grams, or `"inf"` (any case) for unbounded.
pub fn parse_weight_range(row: usize, raw: &str) -> Result<i64, RateTableError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("inf") {
        return Ok(INF_WEIGHT);
    }
    let grams = Decimal::from_str_canonical(trimmed).map_err(|_| RateTableError::InvalidField {
        row,
        field: "weight_range",
        value: raw.to_string(),
    })?;
    if grams.is_negative() {
        return Err(RateTableError::InvalidField {
            row,
            field: "weight_range",
            value: raw.to_string(),
        });
    }
    Ok(gram_to_db_weight(grams).min(INF_WEIGHT))
}

fn field<'a>(
    row_idx: usize,
    row: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, RateTableError> {
    row.get(name)
        .map(String::as_str)
        .ok_or(RateTableError::MissingField {
            row: row_idx,
            field: name,
        })
}

fn decimal_field(
    row_idx: usize,
    row: &HashMap<String, String>,
    name: &'static str,
) -> Result<Decimal, RateTableError> {
    let raw = field(row_idx, row, name)?;
    Decimal::from_str_canonical(raw).map_err(|_| RateTableError::InvalidField {
        row: row_idx,
        field: name,
        value: raw.to_string(),
    })
}

/// Parse one config row into a bracket.
pub(crate) fn parse_row(
    row_idx: usize,
    row: &HashMap<String, String>,
    hpfn_key: &str,
    level: ConfigLevel,
) -> Result<HiddenPriceConf, RateTableError> {
    let weight_range = parse_weight_range(row_idx, field(row_idx, row, "weight_range")?)?;

    let round_raw = field(row_idx, row, "round_size")?;
    let round_size = round_raw
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|v| v.abs() <= MAX_ROUND_SIZE)
        .ok_or_else(|| RateTableError::InvalidField {
            row: row_idx,
            field: "round_size",
            value: round_raw.to_string(),
        })?;

    Ok(HiddenPriceConf {
        weight_range,
        start_price: decimal_field(row_idx, row, "start_price")?,
        start_weight: decimal_field(row_idx, row, "start_weight")?,
        round_size,
        price: decimal_field(row_idx, row, "price")?,
        weight_step: decimal_field(row_idx, row, "weight_step")?,
        adjustment: decimal_field(row_idx, row, "adjustment")?,
        hpfn_key: hpfn_key.to_string(),
        level,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn config_row(
        weight_range: &str,
        start_price: &str,
        start_weight: &str,
        round_size: &str,
        price: &str,
        weight_step: &str,
        adjustment: &str,
    ) -> HashMap<String, String> {
        [
            ("weight_range", weight_range),
            ("start_price", start_price),
            ("start_weight", start_weight),
            ("round_size", round_size),
            ("price", price),
            ("weight_step", weight_step),
            ("adjustment", adjustment),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::config_row;
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn conf(start_price: &str, start_weight: &str, round_size: i32, price: &str, step: &str) -> HiddenPriceConf {
        HiddenPriceConf {
            weight_range: INF_WEIGHT,
            start_price: d(start_price),
            start_weight: d(start_weight),
            round_size,
            price: d(price),
            weight_step: d(step),
            adjustment: Decimal::zero(),
            hpfn_key: "t".to_string(),
            level: ConfigLevel::Default,
        }
    }

    #[test]
    fn test_round_up_floors_at_min() {
        assert_eq!(round_up(d("500"), d("100"), d("300")), Some(d("500")));
        assert_eq!(round_up(d("500"), d("100"), d("500")), Some(d("500")));
        assert_eq!(round_up(d("500"), d("100"), d("501")), Some(d("600")));
        assert_eq!(round_up(d("0"), d("10"), d("1200")), Some(d("1200")));
    }

    #[test]
    fn test_fee_whole_gram_rounding() {
        // round_size -2 -> 100g multiples; 1.5 per 100g above 500g
        let c = conf("3", "500", -2, "1.5", "100");
        assert_eq!(c.compute_fee(d("400")).unwrap(), d("3"));
        assert_eq!(c.compute_fee(d("500")).unwrap(), d("3"));
        assert_eq!(c.compute_fee(d("501")).unwrap(), d("4.5"));
        assert_eq!(c.compute_fee(d("1200")).unwrap(), d("13.5"));
    }

    #[test]
    fn test_fee_positive_round_size_scales() {
        // round_size 1 -> 0.1g resolution; step 0.5g
        // 1.26g -> 12.6 -> 13 tenths -> 13 / 5 = 2 whole steps
        let c = conf("1", "0", 1, "0.2", "0.5");
        assert_eq!(c.compute_fee(d("1.26")).unwrap(), d("1.4"));
    }

    #[test]
    fn test_fee_integer_step_division() {
        // 10g rounding, 25g steps: 60g -> 60 -> 2 whole steps
        let c = conf("0", "0", -1, "1", "25");
        assert_eq!(c.compute_fee(d("55")).unwrap(), d("2"));
    }

    #[test]
    fn test_fee_clamped_at_zero() {
        let mut c = conf("1", "0", 0, "0", "1");
        c.adjustment = d("-5");
        assert_eq!(c.compute_fee(d("10")).unwrap(), Decimal::zero());
    }

    #[test]
    fn test_fee_zero_step_uses_start_price() {
        let c = conf("7", "0", 0, "3", "0");
        assert_eq!(c.compute_fee(d("999")).unwrap(), d("7"));
    }

    #[test]
    fn test_fee_overflow_is_an_error() {
        let scaled = conf("1", "0", 18, "1", "1");
        assert!(matches!(
            scaled.compute_fee(d("100000000000000")),
            Err(PricingError::Internal(_))
        ));

        let tiny_step = conf("1", "0", 0, "1", "0.0000000000000000000000001");
        assert!(matches!(
            tiny_step.compute_fee(d("10000000000")),
            Err(PricingError::Internal(_))
        ));
    }

    #[test]
    fn test_parse_weight_range_inf_case_insensitive() {
        assert_eq!(parse_weight_range(0, "inf").unwrap(), INF_WEIGHT);
        assert_eq!(parse_weight_range(0, "INF").unwrap(), INF_WEIGHT);
        assert_eq!(parse_weight_range(0, " Inf ").unwrap(), INF_WEIGHT);
        assert_eq!(parse_weight_range(0, "500").unwrap(), 50_000_000);
        assert!(parse_weight_range(0, "-1").is_err());
        assert!(parse_weight_range(0, "heavy").is_err());
    }

    #[test]
    fn test_select_ceiling_bracket() {
        let rows = vec![
            config_row("inf", "9", "0", "0", "0", "1", "0"),
            config_row("500", "1", "0", "0", "0", "1", "0"),
            config_row("1000", "2", "0", "0", "0", "1", "0"),
        ];
        let table = RateTable::parse("k", ConfigLevel::Default, &rows).unwrap();
        let pick = |grams: &str| {
            table
                .select(gram_to_db_weight(d(grams)))
                .map(|r| r.start_price)
                .unwrap()
        };
        assert_eq!(pick("100"), d("1"));
        assert_eq!(pick("500"), d("1"));
        assert_eq!(pick("500.001"), d("2"));
        assert_eq!(pick("1000"), d("2"));
        assert_eq!(pick("100000"), d("9"));
    }

    #[test]
    fn test_select_is_monotonic() {
        let rows: Vec<_> = ["100", "250", "500", "1000", "5000", "inf"]
            .iter()
            .map(|w| config_row(w, "0", "0", "0", "0", "1", "0"))
            .collect();
        let table = RateTable::parse("k", ConfigLevel::Default, &rows).unwrap();
        let mut last = i64::MIN;
        for grams in (0..8000).step_by(37) {
            let row = table.select(gram_to_db_weight(Decimal::from(grams))).unwrap();
            assert!(row.weight_range >= last, "bracket went backwards at {}g", grams);
            last = row.weight_range;
        }
    }

    #[test]
    fn test_select_none_above_last_bounded_row() {
        let rows = vec![config_row("500", "1", "0", "0", "0", "1", "0")];
        let table = RateTable::parse("k", ConfigLevel::Default, &rows).unwrap();
        assert!(table.select(gram_to_db_weight(d("501"))).is_none());
    }

    #[test]
    fn test_parse_row_errors() {
        let mut row = config_row("500", "1", "0", "0", "0", "1", "0");
        row.remove("price");
        let err = RateTable::parse("k", ConfigLevel::Item, &[row]).unwrap_err();
        assert_eq!(
            err,
            RateTableError::MissingField {
                row: 0,
                field: "price"
            }
        );

        let row = config_row("500", "1", "0", "99", "0", "1", "0");
        let err = RateTable::parse("k", ConfigLevel::Item, &[row]).unwrap_err();
        assert!(matches!(
            err,
            RateTableError::InvalidField {
                field: "round_size",
                ..
            }
        ));
    }

    #[test]
    fn test_cfg_key_for_mst_and_affiliate() {
        let mut cfg = RateTableCfg {
            mst_key: Some("own".to_string()),
            ..Default::default()
        };
        cfg.affi_keys.insert(Region::new("MY"), "my_table".to_string());
        let sg = Region::new("SG");
        assert_eq!(cfg.key_for(&sg, &sg), Some("own"));
        assert_eq!(cfg.key_for(&sg, &Region::new("MY")), Some("my_table"));
        assert_eq!(cfg.key_for(&sg, &Region::new("TH")), None);
    }
}
