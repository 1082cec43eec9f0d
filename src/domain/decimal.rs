//! Lossless decimal numeric type backed by rust_decimal.
//!
//! Every price, rate and weight that flows through a formula is carried as a
//! [`Decimal`] so that chained multiplication (price × rate × margin × …) never
//! picks up binary floating-point drift.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal as RustDecimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lossless decimal numeric type for price arithmetic.
///
/// Serializes to a JSON string so cached factors survive a round-trip exactly.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::str")] RustDecimal);

impl Decimal {
    /// Create a Decimal from a RustDecimal.
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Create a Decimal from an integer mantissa and a decimal scale,
    /// e.g. `from_parts(229, 2)` is `2.29`.
    pub fn from_parts(mantissa: i64, scale: u32) -> Self {
        Decimal(RustDecimal::new(mantissa, scale))
    }

    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s.trim()).map(Decimal)
    }

    /// Format the Decimal as a canonical string (no exponent notation).
    pub fn to_canonical_string(&self) -> String {
        let normalized = self.0.normalize();
        format!("{}", normalized)
    }

    /// The additive identity (0).
    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    /// The multiplicative identity (1).
    pub fn one() -> Self {
        Decimal(RustDecimal::ONE)
    }

    /// Returns true if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the value is > 0.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    /// Returns true if the value is < 0.
    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    /// Smallest integer greater than or equal to the value.
    pub fn ceil(&self) -> Self {
        Decimal(self.0.ceil())
    }

    /// Integer part, rounding toward zero.
    pub fn trunc(&self) -> Self {
        Decimal(self.0.trunc())
    }

    /// Round half away from zero at `dp` decimal places.
    pub fn round_half_away(&self, dp: u32) -> Self {
        Decimal(
            self.0
                .round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Round toward positive infinity at `dp` decimal places.
    pub fn round_up_at(&self, dp: u32) -> Self {
        Decimal(
            self.0
                .round_dp_with_strategy(dp, RoundingStrategy::ToPositiveInfinity),
        )
    }

    /// Division that returns `None` instead of panicking on a zero divisor.
    pub fn checked_div(&self, rhs: Decimal) -> Option<Self> {
        self.0.checked_div(rhs.0).map(Decimal)
    }

    /// Multiplication that returns `None` on overflow.
    pub fn checked_mul(&self, rhs: Decimal) -> Option<Self> {
        self.0.checked_mul(rhs.0).map(Decimal)
    }

    pub fn checked_add(&self, rhs: Decimal) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Decimal)
    }

    pub fn checked_sub(&self, rhs: Decimal) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Decimal)
    }

    /// Integer part as i64, or `None` when it does not fit.
    pub fn to_i64(&self) -> Option<i64> {
        self.0.trunc().to_i64()
    }

    /// `10^exp` for `exp` up to 28.
    pub fn pow10(exp: u32) -> Self {
        Decimal(RustDecimal::from_i128_with_scale(10i128.pow(exp.min(28)), 0))
    }

    /// `10^-exp` for `exp` up to 28.
    pub fn pow10_neg(exp: u32) -> Self {
        Decimal(RustDecimal::new(1, exp.min(28)))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Decimal(RustDecimal::from(value))
    }
}

// Arithmetic operations
impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Div for Decimal {
    type Output = Decimal;

    fn div(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 / rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

impl std::iter::Sum for Decimal {
    fn sum<I: Iterator<Item = Decimal>>(iter: I) -> Decimal {
        iter.fold(Decimal::zero(), |acc, v| acc + v)
    }
}
