//! Price formulas for Local SIP, CB SIP and CBSC.
//!
//! Inputs and outputs are real values (already deflated from fixed point).
//! Nothing here performs I/O or rounding to a currency.

use crate::domain::Decimal;
use crate::error::PricingError;

/// Factors a Local SIP price needs once a price config exists for the
/// region pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSipFactors {
    pub exchange_rate: Decimal,
    /// Region buffer.
    pub country_margin: Decimal,
    pub init_hidden_price: Decimal,
    pub shipping_fee: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSipPriceInput {
    pub primary_price: Decimal,
    /// Grams.
    pub affiliate_real_weight: Decimal,
    /// `None` when the region pair has no price config.
    pub factors: Option<LocalSipFactors>,
    pub item_margin: Decimal,
    pub shop_margin: Decimal,
    pub oversea_rate: Option<Decimal>,
}

fn positive_or_one(v: Decimal) -> Decimal {
    if v.is_positive() {
        v
    } else {
        Decimal::one()
    }
}

/// `(p * (1 - oversea) / fx + init_hidden + shipping) * country * shop * item`
///
/// Returns 0 for a non-positive affiliate weight and the primary price
/// unchanged when there is no price config.
pub fn local_sip_affiliate_price(input: &LocalSipPriceInput) -> Decimal {
    if !input.affiliate_real_weight.is_positive() {
        return Decimal::zero();
    }
    let Some(factors) = input.factors else {
        return input.primary_price;
    };

    let oversea = match input.oversea_rate {
        Some(r) if r >= Decimal::zero() && r <= Decimal::one() => r,
        _ => Decimal::zero(),
    };
    let exchange_rate = if factors.exchange_rate.is_zero() {
        Decimal::one()
    } else {
        factors.exchange_rate
    };

    let converted = input.primary_price * (Decimal::one() - oversea) / exchange_rate;
    (converted + factors.init_hidden_price + factors.shipping_fee)
        * factors.country_margin
        * positive_or_one(input.shop_margin)
        * positive_or_one(input.item_margin)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CbSipPriceInput {
    pub primary_price: Decimal,
    pub price_ratio: Decimal,
    pub exchange_rate: Decimal,
    pub hidden_price: Decimal,
    pub ratio: Decimal,
    pub country_margin: Decimal,
    pub shop_margin: Decimal,
    pub item_margin: Decimal,
    pub final_fee: Decimal,
}

/// `1 + country + shop + item`, never below 1 once the sum is non-positive.
pub fn cb_sip_margin(country: Decimal, shop: Decimal, item: Decimal) -> Decimal {
    let margin = Decimal::one() + country + shop + item;
    positive_or_one(margin)
}

/// `(p * price_ratio * fx + hidden) * ratio * margin * final_fee`
pub fn cb_sip_affiliate_price(input: &CbSipPriceInput) -> Decimal {
    let margin = cb_sip_margin(input.country_margin, input.shop_margin, input.item_margin);
    (input.primary_price * input.price_ratio * input.exchange_rate + input.hidden_price)
        * input.ratio
        * margin
        * input.final_fee
}

/// `1 - commission - transaction - service` in the 0–1 space, or 1 when that
/// leaves nothing.
pub fn denominator_rate(
    commission_rate: Decimal,
    transaction_fee_rate: Decimal,
    service_fee_rate: Decimal,
) -> Decimal {
    let rate = Decimal::one() - commission_rate - transaction_fee_rate - service_fee_rate;
    positive_or_one(rate)
}

/// MTSKU → MPSKU: `(mtsku * fx * profit + hidden) / denominator`.
pub fn calculate_mpsku_price(
    mtsku_price: Decimal,
    exchange_rate: Decimal,
    profit_rate: Decimal,
    hide_price: Decimal,
    denominator_rate: Decimal,
) -> Decimal {
    let numerator = mtsku_price * exchange_rate * profit_rate + hide_price;
    numerator
        .checked_div(positive_or_one(denominator_rate))
        .unwrap_or(numerator)
}

/// MPSKU → MTSKU: `max(0, mpsku * denominator - hidden) / (fx * profit)`.
///
/// Not an exact inverse of [`calculate_mpsku_price`]: a negative numerator is
/// floored to 0 instead of yielding a negative MTSKU price.
pub fn calculate_mtsku_price(
    mpsku_price: Decimal,
    exchange_rate: Decimal,
    profit_rate: Decimal,
    hide_price: Decimal,
    denominator_rate: Decimal,
) -> Decimal {
    if exchange_rate.is_zero() || profit_rate.is_zero() {
        return Decimal::zero();
    }
    let numerator = mpsku_price * denominator_rate - hide_price;
    if numerator.is_negative() {
        return Decimal::zero();
    }
    numerator
        .checked_div(exchange_rate * profit_rate)
        .unwrap_or_else(Decimal::zero)
}

fn check_rate_in_range(rate: Decimal, inflated_precision: i64) -> Result<(), PricingError> {
    if rate.is_positive() && rate < Decimal::from(inflated_precision) {
        Ok(())
    } else {
        Err(PricingError::InvalidDiscountRate(format!(
            "rate {} outside (0, {})",
            rate, inflated_precision
        )))
    }
}

/// `mtsku * (precision - rate) / precision`; `rate` must lie strictly inside
/// `(0, precision)`.
pub fn price_from_discount_rate(
    mtsku_price: Decimal,
    rate: Decimal,
    inflated_precision: i64,
) -> Result<Decimal, PricingError> {
    check_rate_in_range(rate, inflated_precision)?;
    let precision = Decimal::from(inflated_precision);
    Ok(mtsku_price * (precision - rate) / precision)
}

/// `round((mtsku - mpsku) / mtsku * precision, 2)`; the result must lie
/// strictly inside `(0, precision)`.
pub fn discount_rate_from_price(
    mtsku_price: Decimal,
    mpsku_price: Decimal,
    inflated_precision: i64,
) -> Result<Decimal, PricingError> {
    let ratio = (mtsku_price - mpsku_price)
        .checked_div(mtsku_price)
        .ok_or_else(|| PricingError::InvalidDiscountRate("mtsku price is zero".to_string()))?;
    let rate = (ratio * Decimal::from(inflated_precision)).round_half_away(2);
    check_rate_in_range(rate, inflated_precision)?;
    Ok(rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::numeric::PERCENT_PRECISION_BETWEEN_MTSKU_AND_MPSKU as P;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn example_input() -> LocalSipPriceInput {
        LocalSipPriceInput {
            primary_price: d("82900"),
            affiliate_real_weight: d("1200"),
            factors: Some(LocalSipFactors {
                exchange_rate: d("3400"),
                country_margin: d("1.22"),
                init_hidden_price: d("2.30"),
                shipping_fee: d("10.80"),
            }),
            item_margin: d("1.0"),
            shop_margin: d("1.0"),
            oversea_rate: Some(Decimal::zero()),
        }
    }

    #[test]
    fn test_local_sip_example() {
        let price = local_sip_affiliate_price(&example_input());
        assert_eq!(price.round_half_away(6), d("45.728471"));
    }

    #[test]
    fn test_local_sip_margin_clamp() {
        let base = local_sip_affiliate_price(&example_input());
        for (item, shop) in [("0", "0"), ("-1", "1"), ("1", "-0.5"), ("-2", "-2")] {
            let mut input = example_input();
            input.item_margin = d(item);
            input.shop_margin = d(shop);
            assert_eq!(local_sip_affiliate_price(&input), base);
        }
    }

    #[test]
    fn test_local_sip_guards() {
        let mut input = example_input();
        input.affiliate_real_weight = Decimal::zero();
        assert_eq!(local_sip_affiliate_price(&input), Decimal::zero());

        let mut input = example_input();
        input.factors = None;
        assert_eq!(local_sip_affiliate_price(&input), d("82900"));
    }

    #[test]
    fn test_local_sip_oversea_rate_clamped() {
        let base = local_sip_affiliate_price(&example_input());
        for rate in [None, Some(d("1.5")), Some(d("-0.1"))] {
            let mut input = example_input();
            input.oversea_rate = rate;
            assert_eq!(local_sip_affiliate_price(&input), base);
        }

        let mut input = example_input();
        input.oversea_rate = Some(d("1"));
        // Only the fees remain.
        assert_eq!(local_sip_affiliate_price(&input), d("13.1") * d("1.22"));
    }

    #[test]
    fn test_cb_sip_price() {
        let input = CbSipPriceInput {
            primary_price: d("100"),
            price_ratio: d("1"),
            exchange_rate: d("0.5"),
            hidden_price: d("2"),
            ratio: d("1"),
            country_margin: d("0.1"),
            shop_margin: d("0.05"),
            item_margin: d("0.05"),
            final_fee: d("1"),
        };
        // (100 * 0.5 + 2) * 1.2
        assert_eq!(cb_sip_affiliate_price(&input), d("62.4"));
    }

    #[test]
    fn test_cb_sip_margin_never_non_positive() {
        assert_eq!(cb_sip_margin(d("-1"), d("-0.5"), d("0")), Decimal::one());
        assert_eq!(cb_sip_margin(d("-1"), d("0"), d("0")), Decimal::one());
        assert_eq!(cb_sip_margin(d("-0.5"), d("0"), d("0")), d("0.5"));
    }

    #[test]
    fn test_denominator_rate_clamps() {
        assert_eq!(denominator_rate(d("0.05"), d("0.02"), d("0.03")), d("0.9"));
        assert_eq!(denominator_rate(d("0.6"), d("0.3"), d("0.1")), Decimal::one());
        assert_eq!(denominator_rate(d("0.9"), d("0.9"), d("0")), Decimal::one());
    }

    #[test]
    fn test_mpsku_forward() {
        // (10 * 3 * 1.2 + 4) / 0.8
        let price = calculate_mpsku_price(d("10"), d("3"), d("1.2"), d("4"), d("0.8"));
        assert_eq!(price, d("50"));
    }

    #[test]
    fn test_mtsku_inverse_guard() {
        let price = calculate_mtsku_price(Decimal::zero(), d("3"), d("1"), d("5"), d("1"));
        assert_eq!(price, Decimal::zero());
    }

    #[test]
    fn test_mtsku_inverse_zero_rates() {
        assert_eq!(
            calculate_mtsku_price(d("50"), Decimal::zero(), d("1"), d("0"), d("1")),
            Decimal::zero()
        );
        assert_eq!(
            calculate_mtsku_price(d("50"), d("1"), Decimal::zero(), d("0"), d("1")),
            Decimal::zero()
        );
    }

    #[test]
    fn test_mtsku_inverts_forward_when_fees_small() {
        let mpsku = calculate_mpsku_price(d("10"), d("3"), d("1.2"), d("4"), d("0.8"));
        let mtsku = calculate_mtsku_price(mpsku, d("3"), d("1.2"), d("4"), d("0.8"));
        assert_eq!(mtsku, d("10"));
    }

    #[test]
    fn test_mtsku_asymmetry_when_fees_dominate() {
        // Forward of 0 is positive (fees only); inverse of a smaller price floors at 0.
        let forward = calculate_mpsku_price(Decimal::zero(), d("3"), d("1"), d("5"), d("1"));
        assert_eq!(forward, d("5"));
        let back = calculate_mtsku_price(d("2"), d("3"), d("1"), d("5"), d("1"));
        assert_eq!(back, Decimal::zero());
    }

    #[test]
    fn test_price_from_discount_rate() {
        let price = price_from_discount_rate(d("200"), d("2500"), P).unwrap();
        assert_eq!(price, d("150"));
        assert!(price_from_discount_rate(d("200"), Decimal::zero(), P).is_err());
        assert!(price_from_discount_rate(d("200"), Decimal::from(P), P).is_err());
    }

    #[test]
    fn test_discount_rate_from_price() {
        let rate = discount_rate_from_price(d("200"), d("150"), P).unwrap();
        assert_eq!(rate, d("2500"));
        let rate = discount_rate_from_price(d("3"), d("2"), P).unwrap();
        assert_eq!(rate, d("3333.33"));
    }

    #[test]
    fn test_discount_rate_out_of_range() {
        let err = discount_rate_from_price(d("100"), d("120"), P).unwrap_err();
        assert!(matches!(err, PricingError::InvalidDiscountRate(_)));
        assert!(discount_rate_from_price(d("100"), d("100"), P).is_err());
        assert!(discount_rate_from_price(Decimal::zero(), d("1"), P).is_err());
    }
}
