//! RSI reversal.
//!
//! BUY when RSI crosses down into oversold territory, SELL when it crosses
//! up into overbought — both require the crossing to happen between the two
//! most recent bar-ends.

use rust_decimal::Decimal;
use serde::Deserialize;
use sp_domain::SignalType;

use crate::engine::{SignalDecision, StrategyContext, StrategyEvaluator};
use crate::indicators::rsi_series;

#[derive(Debug, Clone, Deserialize)]
pub struct RsiReversalParams {
    pub period: usize,
    pub oversold: Decimal,
    pub overbought: Decimal,
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
pub struct RsiReversal {
    params: RsiReversalParams,
}

impl RsiReversal {
    pub const KIND: &'static str = "rsi_reversal";

    pub fn new(params: RsiReversalParams) -> Result<Self, String> {
        if params.period == 0 {
            return Err("period must be positive".into());
        }
        if params.oversold >= params.overbought {
            return Err("oversold must be below overbought".into());
        }
        if params.order_qty <= 0 {
            return Err("order_qty must be positive".into());
        }
        Ok(Self { params })
    }
}

impl StrategyEvaluator for RsiReversal {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn required_bars(&self) -> usize {
        // Two consecutive RSI points for the crossing test.
        self.params.period + 2
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
        let rsi = rsi_series(&closes, self.params.period);
        if rsi.len() < 2 {
            return SignalDecision::hold("insufficient data");
        }

        let prev = rsi[rsi.len() - 2];
        let curr = rsi[rsi.len() - 1];

        if prev >= self.params.oversold && curr < self.params.oversold {
            return SignalDecision {
                signal_type: SignalType::Buy,
                confidence: band_confidence(self.params.oversold - curr),
                reason: "RSI oversold crossover".into(),
            };
        }
        if prev <= self.params.overbought && curr > self.params.overbought {
            return SignalDecision {
                signal_type: SignalType::Sell,
                confidence: band_confidence(curr - self.params.overbought),
                reason: "RSI overbought crossover".into(),
            };
        }

        SignalDecision::hold("no reversal")
    }
}

/// Depth of the excursion past the band, mapped into [0, 1] (10 RSI points
/// past the threshold saturates).
fn band_confidence(depth: Decimal) -> Decimal {
    (depth / Decimal::from(10u64)).clamp(Decimal::ZERO, Decimal::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use sp_domain::{Bar, Timeframe};

    fn ctx_from_closes(closes: &[Decimal]) -> StrategyContext {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar {
                bar_id: format!("bar-{i}"),
                symbol: "005930".into(),
                timeframe: Timeframe::M1,
                bar_ts: t0 + Duration::minutes(i as i64),
                open: *c,
                high: *c,
                low: *c,
                close: *c,
                volume: 100,
                closed: true,
            })
            .collect();
        StrategyContext::new(bars)
    }

    fn evaluator(period: usize) -> RsiReversal {
        RsiReversal::new(RsiReversalParams {
            period,
            oversold: dec!(30),
            overbought: dec!(70),
            ttl_seconds: 60,
            cooldown_seconds: 300,
            order_qty: 1,
        })
        .unwrap()
    }

    #[test]
    fn insufficient_data_holds() {
        let closes: Vec<Decimal> = (0..4).map(Decimal::from).collect();
        let d = evaluator(14).evaluate(&ctx_from_closes(&closes));
        assert_eq!(d.signal_type, SignalType::Hold);
        assert_eq!(d.reason, "insufficient data");
    }

    #[test]
    fn oversold_crossover_buys() {
        // Mild chop keeps RSI mid-range, then one hard drop pushes it
        // through the 30 band from above.
        let closes: Vec<Decimal> = vec![
            dec!(100), dec!(101), dec!(100), dec!(102), dec!(101),
            dec!(102), dec!(101), dec!(80),
        ];
        let s = evaluator(4);
        let rsi = rsi_series(&closes, 4);
        let prev = rsi[rsi.len() - 2];
        let curr = rsi[rsi.len() - 1];
        assert!(prev >= dec!(30) && curr < dec!(30), "fixture: {prev} -> {curr}");

        let d = s.evaluate(&ctx_from_closes(&closes));
        assert_eq!(d.signal_type, SignalType::Buy);
        assert_eq!(d.reason, "RSI oversold crossover");
    }

    #[test]
    fn overbought_crossover_sells() {
        let closes: Vec<Decimal> = vec![
            dec!(100), dec!(99), dec!(100), dec!(98), dec!(99),
            dec!(98), dec!(99), dec!(120),
        ];
        let s = evaluator(4);
        let rsi = rsi_series(&closes, 4);
        let prev = rsi[rsi.len() - 2];
        let curr = rsi[rsi.len() - 1];
        assert!(prev <= dec!(70) && curr > dec!(70), "fixture: {prev} -> {curr}");

        let d = s.evaluate(&ctx_from_closes(&closes));
        assert_eq!(d.signal_type, SignalType::Sell);
        assert_eq!(d.reason, "RSI overbought crossover");
    }

    #[test]
    fn deep_inside_band_holds() {
        // Already far below oversold on both bar-ends: no fresh crossing.
        let closes: Vec<Decimal> = vec![
            dec!(100), dec!(90), dec!(80), dec!(70), dec!(60),
            dec!(50), dec!(40), dec!(30),
        ];
        let d = evaluator(4).evaluate(&ctx_from_closes(&closes));
        assert_eq!(d.signal_type, SignalType::Hold);
    }
}
