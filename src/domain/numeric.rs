//! Fixed-point ⇄ real conversions.
//!
//! Persisted prices, weights and percentages are integers scaled by a fixed
//! precision. Raw `0` and `-1` are sentinels ("unset" / "no value") and pass
//! through every conversion unchanged in both directions.
//!
//! Two percentage scales coexist: [`PERCENT_PRECISION`] for platform ratios and
//! [`PERCENT_PRECISION_BETWEEN_MTSKU_AND_MPSKU`] for CBSC rates. They must not
//! be mixed; use the `*_with` variants with the right constant.

use super::Decimal;

pub const PRICE_PRECISION: i64 = 100_000;
pub const WEIGHT_PRECISION: i64 = 100_000;
pub const PERCENT_PRECISION: i64 = 100_000;
pub const PERCENT_PRECISION_BETWEEN_MTSKU_AND_MPSKU: i64 = 10_000;

/// Raw value meaning "no value".
pub const UNSET: i64 = -1;

/// Fixed-point weight standing for "no upper bound".
pub const INF_WEIGHT: i64 = (i64::MAX / WEIGHT_PRECISION) * WEIGHT_PRECISION;

fn is_sentinel_raw(raw: i64) -> bool {
    raw == 0 || raw == UNSET
}

fn is_sentinel_real(value: Decimal) -> bool {
    value.is_zero() || value == Decimal::from(UNSET)
}

/// Deflate a fixed-point integer by `precision`.
pub fn deflate(raw: i64, precision: i64) -> Decimal {
    if is_sentinel_raw(raw) || precision <= 0 {
        return Decimal::from(raw);
    }
    Decimal::from(raw) / Decimal::from(precision)
}

/// Inflate a real value by `precision`, rounding half away from zero.
///
/// Values outside the i64 range saturate.
pub fn inflate(value: Decimal, precision: i64) -> i64 {
    if is_sentinel_real(value) {
        return value.to_i64().unwrap_or(0);
    }
    let scaled = match value.checked_mul(Decimal::from(precision.max(1))) {
        Some(v) => v.round_half_away(0),
        None => return saturate(value),
    };
    scaled.to_i64().unwrap_or_else(|| saturate(value))
}

fn saturate(value: Decimal) -> i64 {
    if value.is_negative() {
        i64::MIN
    } else {
        i64::MAX
    }
}

pub fn to_real_price(raw: i64) -> Decimal {
    deflate(raw, PRICE_PRECISION)
}

pub fn to_db_price(value: Decimal) -> i64 {
    inflate(value, PRICE_PRECISION)
}

pub fn db_weight_to_gram(raw: i64) -> Decimal {
    deflate(raw, WEIGHT_PRECISION)
}

pub fn gram_to_db_weight(grams: Decimal) -> i64 {
    inflate(grams, WEIGHT_PRECISION)
}

pub fn to_real_ratio(raw: i64) -> Decimal {
    deflate(raw, PERCENT_PRECISION)
}

pub fn to_db_ratio(value: Decimal) -> i64 {
    inflate(value, PERCENT_PRECISION)
}

pub fn to_real_ratio_with(raw: i64, precision: i64) -> Decimal {
    deflate(raw, precision)
}

pub fn to_db_ratio_with(value: Decimal, precision: i64) -> i64 {
    inflate(value, precision)
}

/// Round `value` to `round_place` decimals (half away from zero), then inflate
/// by `precision` and keep the integer part.
pub fn round_float_to_int(value: Decimal, precision: i64, round_place: u32) -> i64 {
    let rounded = value.round_half_away(round_place);
    match rounded.checked_mul(Decimal::from(precision.max(1))) {
        Some(v) => v.to_i64().unwrap_or_else(|| saturate(v)),
        None => saturate(rounded),
    }
}

/// Deflate `value` by `precision` and round to `round_place` decimals
/// (half away from zero).
pub fn round_int_to_float(value: i64, precision: i64, round_place: u32) -> Decimal {
    let precision = precision.max(1);
    (Decimal::from(value) / Decimal::from(precision)).round_half_away(round_place)
}
