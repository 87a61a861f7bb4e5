//! Moving-average crossover.
//!
//! BUY on a golden cross (short SMA crosses above long SMA between the two
//! most recent bar-ends), SELL on the death cross, HOLD otherwise.

use rust_decimal::Decimal;
use serde::Deserialize;
use sp_domain::SignalType;

use crate::engine::{SignalDecision, StrategyContext, StrategyEvaluator};
use crate::indicators::{sma, sma_ending_at};

#[derive(Debug, Clone, Deserialize)]
pub struct MaCrossoverParams {
    pub short_period: usize,
    pub long_period: usize,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: i64,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: i64,
    #[serde(default = "default_qty")]
    pub order_qty: i64,
}

fn default_ttl() -> i64 {
    60
}

fn default_cooldown() -> i64 {
    300
}

fn default_qty() -> i64 {
    1
}

#[derive(Debug, Clone)]
pub struct MaCrossover {
    params: MaCrossoverParams,
}

impl MaCrossover {
    pub const KIND: &'static str = "ma_crossover";

    pub fn new(params: MaCrossoverParams) -> Result<Self, String> {
        if params.short_period == 0 || params.long_period == 0 {
            return Err("periods must be positive".into());
        }
        if params.short_period >= params.long_period {
            return Err("short_period must be less than long_period".into());
        }
        if params.order_qty <= 0 {
            return Err("order_qty must be positive".into());
        }
        Ok(Self { params })
    }
}

impl StrategyEvaluator for MaCrossover {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn required_bars(&self) -> usize {
        self.params.long_period + 1
    }

    fn ttl_seconds(&self) -> i64 {
        self.params.ttl_seconds
    }

    fn cooldown_seconds(&self) -> i64 {
        self.params.cooldown_seconds
    }

    fn order_qty(&self) -> i64 {
        self.params.order_qty
    }

    fn evaluate(&self, ctx: &StrategyContext) -> SignalDecision {
        let closes = ctx.closes();
        let n = closes.len();
        if n < self.params.long_period + 1 {
            return SignalDecision::hold("insufficient data");
        }

        // SMAs at the latest bar-end and one bar back.
        let curr_short = sma(&closes, self.params.short_period);
        let curr_long = sma(&closes, self.params.long_period);
        let prev_short = sma_ending_at(&closes, self.params.short_period, n - 1);
        let prev_long = sma_ending_at(&closes, self.params.long_period, n - 1);

        let (Some(cs), Some(cl), Some(ps), Some(pl)) =
            (curr_short, curr_long, prev_short, prev_long)
        else {
            return SignalDecision::hold("insufficient data");
        };

        if ps <= pl && cs > cl {
            return SignalDecision {
                signal_type: SignalType::Buy,
                confidence: cross_confidence(cs, cl),
                reason: "golden cross".into(),
            };
        }
        if ps >= pl && cs < cl {
            return SignalDecision {
                signal_type: SignalType::Sell,
                confidence: cross_confidence(cs, cl),
                reason: "death cross".into(),
            };
        }

        SignalDecision::hold("no crossover")
    }
}

/// Normalized short/long separation, capped at 1. A wider gap right after
/// the cross reads as a stronger signal.
fn cross_confidence(short: Decimal, long: Decimal) -> Decimal {
    if long.is_zero() {
        return Decimal::ONE;
    }
    let gap = ((short - long) / long).abs() * Decimal::from(100u64);
    gap.min(Decimal::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use sp_domain::{Bar, Timeframe};

    fn bars_from_closes(closes: &[i64]) -> StrategyContext {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let px = Decimal::from(*c);
                Bar {
                    bar_id: format!("bar-{i}"),
                    symbol: "005930".into(),
                    timeframe: Timeframe::M1,
                    bar_ts: t0 + Duration::minutes(i as i64),
                    open: px,
                    high: px,
                    low: px,
                    close: px,
                    volume: 100,
                    closed: true,
                }
            })
            .collect();
        StrategyContext::new(bars)
    }

    fn eval(short: usize, long: usize, closes: &[i64]) -> SignalDecision {
        let s = MaCrossover::new(MaCrossoverParams {
            short_period: short,
            long_period: long,
            ttl_seconds: 60,
            cooldown_seconds: 300,
            order_qty: 1,
        })
        .unwrap();
        s.evaluate(&bars_from_closes(closes))
    }

    #[test]
    fn insufficient_data_holds() {
        let d = eval(2, 4, &[10, 10, 10, 10]);
        assert_eq!(d.signal_type, SignalType::Hold);
        assert_eq!(d.reason, "insufficient data");
    }

    #[test]
    fn golden_cross_buys() {
        // Flat then a sharp rise: short SMA overtakes long SMA on the last bar.
        let d = eval(2, 4, &[10, 10, 10, 10, 10, 16]);
        assert_eq!(d.signal_type, SignalType::Buy);
        assert_eq!(d.reason, "golden cross");
        assert!(d.confidence > dec!(0) && d.confidence <= dec!(1));
    }

    #[test]
    fn death_cross_sells() {
        let d = eval(2, 4, &[10, 10, 10, 10, 10, 4]);
        assert_eq!(d.signal_type, SignalType::Sell);
        assert_eq!(d.reason, "death cross");
    }

    #[test]
    fn already_crossed_holds() {
        // Short stays above long on both bar-ends: no fresh cross.
        let d = eval(2, 4, &[10, 10, 10, 16, 18, 20]);
        assert_eq!(d.signal_type, SignalType::Hold);
    }

    #[test]
    fn invalid_params_rejected() {
        assert!(MaCrossover::new(MaCrossoverParams {
            short_period: 20,
            long_period: 5,
            ttl_seconds: 60,
            cooldown_seconds: 300,
            order_qty: 1,
        })
        .is_err());
    }
}
