//! Decimal scale conventions.
//!
//! | Scale | Used for                      |
//! |-------|-------------------------------|
//! | 8     | indicator values (SMA/EMA/RSI)|
//! | 4     | prices                        |
//! | 2     | currency amounts (PnL, limits)|
//!
//! Rounding is HALF_UP everywhere (`MidpointAwayFromZero`). Persisted columns
//! carry the matching `NUMERIC` scale.

use rust_decimal::{Decimal, RoundingStrategy};

pub const INDICATOR_SCALE: u32 = 8;
pub const PRICE_SCALE: u32 = 4;
pub const MONEY_SCALE: u32 = 2;

/// Round an indicator value to scale 8, HALF_UP.
pub fn round_indicator(v: Decimal) -> Decimal {
    v.round_dp_with_strategy(INDICATOR_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a price to scale 4, HALF_UP.
pub fn round_price(v: Decimal) -> Decimal {
    v.round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a currency amount to scale 2, HALF_UP.
pub fn round_money(v: Decimal) -> Decimal {
    v.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn half_up_at_each_scale() {
        assert_eq!(round_indicator(dec!(1.234567895)), dec!(1.23456790));
        assert_eq!(round_price(dec!(100.00005)), dec!(100.0001));
        assert_eq!(round_money(dec!(-0.005)), dec!(-0.01));
    }

    #[test]
    fn exact_values_pass_through() {
        assert_eq!(round_price(dec!(70000)), dec!(70000));
        assert_eq!(round_money(dec!(12.34)), dec!(12.34));
    }
}
