//! Position and realized-PnL arithmetic.
//!
//! Pure logic, no IO. Average price is the cost basis at scale 4 HALF_UP;
//! realized deltas are currency at scale 2. A SELL against a long realizes
//! `(fill_price − avg_price) × closed_qty`; a BUY against a short realizes
//! `(avg_price − fill_price) × covered_qty`. Residual quantity past zero
//! flips the position and resets the basis to the fill price — only when
//! shorting (or the symmetric long flip) is permitted by configuration.

use rust_decimal::Decimal;
use thiserror::Error;

use sp_domain::{round_money, round_price, Side};

#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub new_qty: i64,
    /// None when the position ends flat.
    pub new_avg_price: Option<Decimal>,
    /// Realized PnL of this fill, commission already deducted when present.
    pub realized_delta: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountingError {
    #[error("fill would open a short position and shorting is disabled")]
    ShortNotAllowed,
    #[error("position has qty {qty} but no average price")]
    MissingAvgPrice { qty: i64 },
}

/// Fold one fill into a position.
///
/// `qty` / `avg_price` describe the current position (signed; `avg_price`
/// None iff flat). `allow_short` gates any SELL residual below zero.
pub fn apply_fill_to_position(
    qty: i64,
    avg_price: Option<Decimal>,
    side: Side,
    fill_qty: i64,
    fill_price: Decimal,
    commission: Option<Decimal>,
    allow_short: bool,
) -> Result<PositionUpdate, AccountingError> {
    debug_assert!(fill_qty > 0);

    let avg = match (qty, avg_price) {
        (0, _) => Decimal::ZERO,
        (q, None) => return Err(AccountingError::MissingAvgPrice { qty: q }),
        (_, Some(a)) => a,
    };

    let mut update = match side {
        Side::Buy if qty >= 0 => extend(qty, avg, fill_qty, fill_price),
        Side::Sell if qty <= 0 => {
            if !allow_short {
                return Err(AccountingError::ShortNotAllowed);
            }
            extend(-qty, avg, fill_qty, fill_price).flipped()
        }
        Side::Sell => reduce(qty, avg, fill_qty, fill_price, allow_short)?,
        Side::Buy => {
            // Covering a short: same reduction geometry with signs flipped;
            // a long residual is always permitted.
            let r = reduce(-qty, avg, fill_qty, fill_price, true)?;
            PositionUpdate {
                new_qty: -r.new_qty,
                new_avg_price: r.new_avg_price,
                // Short cover realizes (entry − cover price) × covered.
                realized_delta: -r.realized_delta,
            }
        }
    };

    if let Some(fee) = commission {
        update.realized_delta = round_money(update.realized_delta - fee);
    }
    Ok(update)
}

/// Add to a same-direction position: weighted-average basis, no realization.
/// Works on magnitudes; the caller fixes signs.
fn extend(qty_abs: i64, avg: Decimal, fill_qty: i64, fill_price: Decimal) -> PositionUpdate {
    let new_qty = qty_abs + fill_qty;
    let basis = avg * Decimal::from(qty_abs) + fill_price * Decimal::from(fill_qty);
    PositionUpdate {
        new_qty,
        new_avg_price: Some(round_price(basis / Decimal::from(new_qty))),
        realized_delta: Decimal::ZERO,
    }
}

/// Close (part of) a long: realize against the basis, keep the basis for any
/// remaining quantity, flip to a short residual when permitted.
fn reduce(
    qty_abs: i64,
    avg: Decimal,
    fill_qty: i64,
    fill_price: Decimal,
    allow_flip: bool,
) -> Result<PositionUpdate, AccountingError> {
    let closed = fill_qty.min(qty_abs);
    let realized = round_money((fill_price - avg) * Decimal::from(closed));
    let new_qty = qty_abs - fill_qty;

    let new_avg_price = if new_qty > 0 {
        Some(avg)
    } else if new_qty == 0 {
        None
    } else if allow_flip {
        // Residual opens the opposite side at the fill price.
        Some(round_price(fill_price))
    } else {
        return Err(AccountingError::ShortNotAllowed);
    };

    Ok(PositionUpdate {
        new_qty,
        new_avg_price,
        realized_delta: realized,
    })
}

impl PositionUpdate {
    /// Mirror a long-side computation onto the short side.
    fn flipped(self) -> PositionUpdate {
        PositionUpdate {
            new_qty: -self.new_qty,
            new_avg_price: self.new_avg_price,
            realized_delta: self.realized_delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn first_buy_opens_long_at_fill_price() {
        let u = apply_fill_to_position(0, None, Side::Buy, 10, dec!(70000), None, false).unwrap();
        assert_eq!(u.new_qty, 10);
        assert_eq!(u.new_avg_price, Some(dec!(70000)));
        assert_eq!(u.realized_delta, dec!(0));
    }

    #[test]
    fn buy_extends_long_with_weighted_average() {
        let u = apply_fill_to_position(
            10,
            Some(dec!(70000)),
            Side::Buy,
            10,
            dec!(71000),
            None,
            false,
        )
        .unwrap();
        assert_eq!(u.new_qty, 20);
        assert_eq!(u.new_avg_price, Some(dec!(70500)));
        assert_eq!(u.realized_delta, dec!(0));
    }

    #[test]
    fn sell_closes_long_and_realizes() {
        let u = apply_fill_to_position(
            10,
            Some(dec!(70000)),
            Side::Sell,
            4,
            dec!(71000),
            None,
            false,
        )
        .unwrap();
        assert_eq!(u.new_qty, 6);
        assert_eq!(u.new_avg_price, Some(dec!(70000)), "basis unchanged");
        assert_eq!(u.realized_delta, dec!(4000));
    }

    #[test]
    fn full_close_goes_flat() {
        let u = apply_fill_to_position(
            10,
            Some(dec!(70000)),
            Side::Sell,
            10,
            dec!(69000),
            None,
            false,
        )
        .unwrap();
        assert_eq!(u.new_qty, 0);
        assert_eq!(u.new_avg_price, None);
        assert_eq!(u.realized_delta, dec!(-10000));
    }

    #[test]
    fn oversell_without_shorting_is_rejected() {
        let err = apply_fill_to_position(
            10,
            Some(dec!(70000)),
            Side::Sell,
            15,
            dec!(71000),
            None,
            false,
        )
        .unwrap_err();
        assert_eq!(err, AccountingError::ShortNotAllowed);
    }

    #[test]
    fn oversell_with_shorting_flips_and_resets_basis() {
        let u = apply_fill_to_position(
            10,
            Some(dec!(70000)),
            Side::Sell,
            15,
            dec!(71000),
            None,
            true,
        )
        .unwrap();
        assert_eq!(u.new_qty, -5);
        assert_eq!(u.new_avg_price, Some(dec!(71000)));
        // Only the closed 10 realize.
        assert_eq!(u.realized_delta, dec!(10000));
    }

    #[test]
    fn sell_opens_short_when_allowed() {
        let u = apply_fill_to_position(0, None, Side::Sell, 5, dec!(70000), None, true).unwrap();
        assert_eq!(u.new_qty, -5);
        assert_eq!(u.new_avg_price, Some(dec!(70000)));

        let err = apply_fill_to_position(0, None, Side::Sell, 5, dec!(70000), None, false)
            .unwrap_err();
        assert_eq!(err, AccountingError::ShortNotAllowed);
    }

    #[test]
    fn sell_extends_short_with_weighted_average() {
        let u = apply_fill_to_position(
            -10,
            Some(dec!(70000)),
            Side::Sell,
            10,
            dec!(72000),
            None,
            true,
        )
        .unwrap();
        assert_eq!(u.new_qty, -20);
        assert_eq!(u.new_avg_price, Some(dec!(71000)));
        assert_eq!(u.realized_delta, dec!(0));
    }

    #[test]
    fn buy_covers_short_and_realizes() {
        // Short 10 @ 70,000, cover 4 @ 68,000: realize (70,000−68,000)×4.
        let u = apply_fill_to_position(
            -10,
            Some(dec!(70000)),
            Side::Buy,
            4,
            dec!(68000),
            None,
            false,
        )
        .unwrap();
        assert_eq!(u.new_qty, -6);
        assert_eq!(u.new_avg_price, Some(dec!(70000)));
        assert_eq!(u.realized_delta, dec!(8000));
    }

    #[test]
    fn buy_past_short_flips_long() {
        let u = apply_fill_to_position(
            -10,
            Some(dec!(70000)),
            Side::Buy,
            15,
            dec!(69000),
            None,
            false,
        )
        .unwrap();
        assert_eq!(u.new_qty, 5);
        assert_eq!(u.new_avg_price, Some(dec!(69000)));
        assert_eq!(u.realized_delta, dec!(10000));
    }

    #[test]
    fn commission_reduces_realized_delta() {
        let u = apply_fill_to_position(
            10,
            Some(dec!(70000)),
            Side::Sell,
            10,
            dec!(71000),
            Some(dec!(150.50)),
            false,
        )
        .unwrap();
        assert_eq!(u.realized_delta, dec!(9849.50));
    }

    #[test]
    fn rounding_stays_within_a_cent() {
        // Basis 3 @ 100.0001, sell 3 @ 100.0002: exact PnL 0.0003 → 0.00 at
        // scale 2 (drift well under 0.01).
        let u = apply_fill_to_position(
            3,
            Some(dec!(100.0001)),
            Side::Sell,
            3,
            dec!(100.0002),
            None,
            false,
        )
        .unwrap();
        assert_eq!(u.realized_delta, dec!(0.00));

        // Weighted average rounds HALF_UP at scale 4.
        let u = apply_fill_to_position(
            3,
            Some(dec!(100.0001)),
            Side::Buy,
            1,
            dec!(100.0004),
            None,
            false,
        )
        .unwrap();
        assert_eq!(u.new_avg_price, Some(dec!(100.0002)));
    }
}
