//! Pure computation engine for deterministic price formulas.

pub mod formula;

pub use formula::{
    calculate_mpsku_price, calculate_mtsku_price, cb_sip_affiliate_price, cb_sip_margin,
    denominator_rate, discount_rate_from_price, local_sip_affiliate_price,
    price_from_discount_rate, CbSipPriceInput, LocalSipFactors, LocalSipPriceInput,
};
