//! Indicator library.
//!
//! Pure functions over ordered close sequences, computed at decimal scale 8
//! with HALF_UP rounding. RSI uses Wilder smoothing.

use rust_decimal::Decimal;
use sp_domain::round_indicator;

/// Simple moving average over the last `period` closes. `None` when there
/// is not enough data or `period` is zero.
pub fn sma(closes: &[Decimal], period: usize) -> Option<Decimal> {
    sma_ending_at(closes, period, closes.len())
}

/// SMA over the `period` closes ending just before index `end` (exclusive).
/// Lets callers evaluate the same window one bar back without copying.
pub fn sma_ending_at(closes: &[Decimal], period: usize, end: usize) -> Option<Decimal> {
    if period == 0 || end > closes.len() || end < period {
        return None;
    }
    let window = &closes[end - period..end];
    let sum: Decimal = window.iter().copied().sum();
    Some(round_indicator(sum / Decimal::from(period as u64)))
}

/// Exponential moving average of the full sequence, seeded with the SMA of
/// the first `period` closes. `None` when there is not enough data.
pub fn ema(closes: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let seed = sma_ending_at(closes, period, period)?;
    let multiplier =
        Decimal::from(2u64) / Decimal::from((period + 1) as u64);

    let mut value = seed;
    for close in &closes[period..] {
        value = round_indicator((*close - value) * multiplier + value);
    }
    Some(value)
}

/// Wilder RSI series.
///
/// Returns one value per close from index `period` onward (an input of
/// `period + k` closes yields `k` values); empty when the input is too
/// short. Values are in [0, 100] at scale 8.
pub fn rsi_series(closes: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let hundred = Decimal::from(100u64);
    let p = Decimal::from(period as u64);

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for w in closes.windows(2) {
        let diff = w[1] - w[0];
        if diff > Decimal::ZERO {
            gains.push(diff);
            losses.push(Decimal::ZERO);
        } else {
            gains.push(Decimal::ZERO);
            losses.push(-diff);
        }
    }

    // Seed averages over the first `period` moves, then Wilder-smooth.
    let mut avg_gain: Decimal = gains[..period].iter().copied().sum::<Decimal>() / p;
    let mut avg_loss: Decimal = losses[..period].iter().copied().sum::<Decimal>() / p;

    let mut out = Vec::with_capacity(closes.len() - period);
    out.push(rsi_point(avg_gain, avg_loss, hundred));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (p - Decimal::ONE) + gains[i]) / p;
        avg_loss = (avg_loss * (p - Decimal::ONE) + losses[i]) / p;
        out.push(rsi_point(avg_gain, avg_loss, hundred));
    }

    out
}

fn rsi_point(avg_gain: Decimal, avg_loss: Decimal, hundred: Decimal) -> Decimal {
    if avg_loss.is_zero() {
        return if avg_gain.is_zero() {
            // No movement at all: conventionally neutral.
            round_indicator(Decimal::from(50u64))
        } else {
            hundred
        };
    }
    let rs = avg_gain / avg_loss;
    round_indicator(hundred - hundred / (Decimal::ONE + rs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn closes(vals: &[i64]) -> Vec<Decimal> {
        vals.iter().map(|v| Decimal::from(*v)).collect()
    }

    #[test]
    fn sma_basic_and_windowed() {
        let c = closes(&[1, 2, 3, 4, 5]);
        assert_eq!(sma(&c, 5), Some(dec!(3)));
        assert_eq!(sma(&c, 2), Some(dec!(4.5)));
        // One bar back: window [3, 4].
        assert_eq!(sma_ending_at(&c, 2, 4), Some(dec!(3.5)));
        assert_eq!(sma(&c, 6), None);
        assert_eq!(sma(&c, 0), None);
    }

    #[test]
    fn sma_rounds_to_scale_8() {
        let c = closes(&[1, 1, 2]);
        // 4/3 = 1.333... → scale 8 HALF_UP.
        assert_eq!(sma(&c, 3), Some(dec!(1.33333333)));
    }

    #[test]
    fn ema_matches_hand_computation() {
        let c = closes(&[10, 11, 12, 13]);
        // seed = sma([10,11,12]) = 11; k = 2/4 = 0.5; ema = (13-11)*0.5 + 11 = 12.
        assert_eq!(ema(&c, 3), Some(dec!(12)));
        assert_eq!(ema(&c[..2], 3), None);
    }

    #[test]
    fn rsi_all_gains_is_100_all_losses_is_0() {
        let up = closes(&[1, 2, 3, 4, 5, 6]);
        let r = rsi_series(&up, 3);
        assert!(!r.is_empty());
        assert!(r.iter().all(|v| *v == dec!(100)));

        let down = closes(&[6, 5, 4, 3, 2, 1]);
        let r = rsi_series(&down, 3);
        assert!(r.iter().all(|v| *v == dec!(0)));
    }

    #[test]
    fn rsi_series_length_and_range() {
        let c = closes(&[44, 45, 44, 46, 45, 47, 48, 47, 49, 50]);
        let r = rsi_series(&c, 5);
        assert_eq!(r.len(), c.len() - 5);
        assert!(r
            .iter()
            .all(|v| *v >= dec!(0) && *v <= dec!(100)));
    }

    #[test]
    fn rsi_too_short_is_empty() {
        let c = closes(&[1, 2, 3]);
        assert!(rsi_series(&c, 3).is_empty());
    }

    #[test]
    fn flat_series_is_neutral() {
        let c = closes(&[5, 5, 5, 5, 5]);
        let r = rsi_series(&c, 3);
        assert!(r.iter().all(|v| *v == dec!(50)));
    }
}
