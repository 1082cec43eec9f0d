//! Currency-specific rounding of derived prices.

use super::Decimal;
use serde::{Deserialize, Serialize};

/// Rounding rule for one currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyRule {
    /// Number of decimal places prices are quoted with.
    pub decimal_places: u32,
    /// Snap fractions to merchandising price points (.50 / .90 / .99).
    #[serde(default)]
    pub use_special_roundup: bool,
}

impl Default for CurrencyRule {
    fn default() -> Self {
        Self {
            decimal_places: 2,
            use_special_roundup: false,
        }
    }
}

impl CurrencyRule {
    pub fn new(decimal_places: u32, use_special_roundup: bool) -> Self {
        Self {
            decimal_places,
            use_special_roundup,
        }
    }

    /// Apply this currency's rounding to a real price.
    pub fn round(&self, price: Decimal) -> Decimal {
        if self.use_special_roundup {
            special_price_round_up(price, self.decimal_places)
        } else {
            price_round_up(price, self.decimal_places)
        }
    }

    /// Float-noise tolerance for special roundup: `10^(p-2)` with
    /// `p = -decimal_places`.
    pub fn special_epsilon(&self) -> Decimal {
        special_epsilon(self.decimal_places)
    }
}

fn special_epsilon(decimal_places: u32) -> Decimal {
    Decimal::pow10_neg(decimal_places + 2)
}

/// Ceil to `decimal_places`.
pub fn price_round_up(price: Decimal, decimal_places: u32) -> Decimal {
    price.round_up_at(decimal_places)
}

/// Snap the fractional part into `{0, .5, .9, .99, 1}`, rounding up to the next
/// price point. Each bucket is inclusive-low and widened by epsilon so values
/// a hair above a price point stay on it. Non-positive prices are returned
/// unchanged.
pub fn special_price_round_up(price: Decimal, decimal_places: u32) -> Decimal {
    if !price.is_positive() {
        return price;
    }

    let eps = special_epsilon(decimal_places);
    let whole = price.trunc();
    let frac = price - whole;

    let half = Decimal::from_parts(5, 1);
    let ninety = Decimal::from_parts(9, 1);
    let ninety_nine = Decimal::from_parts(99, 2);

    if frac < eps {
        whole
    } else if frac < half + eps {
        whole + half
    } else if frac < ninety + eps {
        whole + ninety
    } else if frac < ninety_nine + eps {
        whole + ninety_nine
    } else {
        whole + Decimal::one()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_price_round_up_ceils() {
        assert_eq!(price_round_up(d("45.728471"), 2), d("45.73"));
        assert_eq!(price_round_up(d("45.7"), 2), d("45.70"));
        assert_eq!(price_round_up(d("1200.01"), 0), d("1201"));
    }

    #[test]
    fn test_special_roundup_buckets() {
        // p = 2 -> eps = 0.0001
        let cases = [
            ("10.00", "10"),
            ("10.00009", "10"),
            ("10.0001", "10.5"),
            ("10.3", "10.5"),
            ("10.5", "10.5"),
            ("10.50009", "10.5"),
            ("10.5001", "10.9"),
            ("10.9", "10.9"),
            ("10.90009", "10.9"),
            ("10.95", "10.99"),
            ("10.99", "10.99"),
            ("10.99009", "10.99"),
            ("10.9901", "11"),
            ("10.999", "11"),
        ];
        for (input, expected) in cases {
            assert_eq!(
                special_price_round_up(d(input), 2),
                d(expected),
                "bucket mismatch for {}",
                input
            );
        }
    }

    #[test]
    fn test_special_roundup_non_positive_unchanged() {
        assert_eq!(special_price_round_up(Decimal::zero(), 2), Decimal::zero());
        assert_eq!(special_price_round_up(d("-3.3"), 2), d("-3.3"));
    }

    #[test]
    fn test_rule_selects_strategy() {
        let plain = CurrencyRule::new(2, false);
        let special = CurrencyRule::new(2, true);
        assert_eq!(plain.round(d("45.728471")), d("45.73"));
        assert_eq!(special.round(d("45.728471")), d("45.9"));
        assert_eq!(special.special_epsilon(), d("0.0001"));
    }

    #[test]
    fn test_rule_default_is_two_places_plain() {
        let rule = CurrencyRule::default();
        assert_eq!(rule.decimal_places, 2);
        assert!(!rule.use_special_roundup);
    }
}
