//! Conformance vectors for the two built-in strategies, driven through the
//! registry exactly as the scheduler builds them.

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use sp_domain::{Bar, SignalType, Timeframe};
use sp_strategy::{rsi_series, StrategyContext, StrategyRegistry};

fn bars(closes: &[Decimal]) -> StrategyContext {
    let t0 = Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap();
    StrategyContext::new(
        closes
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
            .collect(),
    )
}

#[test]
fn thirty_five_bar_golden_cross_buys() {
    let registry = StrategyRegistry::with_builtins();
    let strat = registry
        .build(&json!({
            "kind": "ma_crossover",
            "short_period": 5,
            "long_period": 20,
        }))
        .expect("build");

    // 34 flat closes, then a jump: SMA(5) crosses above SMA(20) at bar 35.
    let mut closes = vec![dec!(100); 34];
    closes.push(dec!(130));
    let decision = strat.evaluate(&bars(&closes));
    assert_eq!(decision.signal_type, SignalType::Buy);
    assert_eq!(decision.reason, "golden cross");

    // One bar earlier there is no cross yet.
    let decision = strat.evaluate(&bars(&closes[..34]));
    assert_eq!(decision.signal_type, SignalType::Hold);
}

#[test]
fn under_provisioned_window_holds() {
    let registry = StrategyRegistry::with_builtins();
    let strat = registry
        .build(&json!({
            "kind": "ma_crossover",
            "short_period": 5,
            "long_period": 20,
        }))
        .expect("build");

    let closes = vec![dec!(100); 20]; // long_period + 1 bars required
    let decision = strat.evaluate(&bars(&closes));
    assert_eq!(decision.signal_type, SignalType::Hold);
    assert_eq!(decision.reason, "insufficient data");
}

#[test]
fn rsi_oversold_crossover_buys_and_overbought_sells() {
    let registry = StrategyRegistry::with_builtins();
    let strat = registry
        .build(&json!({
            "kind": "rsi_reversal",
            "period": 14,
            "oversold": 30,
            "overbought": 70,
        }))
        .expect("build");

    // Mild chop for 16 bars keeps RSI(14) mid-range, then one hard drop
    // carries it through the oversold band from above.
    let mut closes: Vec<Decimal> = Vec::new();
    for i in 0..17 {
        closes.push(if i % 2 == 0 { dec!(100) } else { dec!(101) });
    }
    closes.push(dec!(80));

    let rsi = rsi_series(&closes, 14);
    let prev = rsi[rsi.len() - 2];
    let curr = rsi[rsi.len() - 1];
    assert!(
        prev >= dec!(30) && curr < dec!(30),
        "fixture must cross the band: {prev} -> {curr}"
    );

    let decision = strat.evaluate(&bars(&closes));
    assert_eq!(decision.signal_type, SignalType::Buy);
    assert_eq!(decision.reason, "RSI oversold crossover");

    // Mirror image: chop, then one hard rally through the overbought band.
    let mut closes: Vec<Decimal> = Vec::new();
    for i in 0..17 {
        closes.push(if i % 2 == 0 { dec!(100) } else { dec!(99) });
    }
    closes.push(dec!(120));

    let rsi = rsi_series(&closes, 14);
    let prev = rsi[rsi.len() - 2];
    let curr = rsi[rsi.len() - 1];
    assert!(
        prev <= dec!(70) && curr > dec!(70),
        "fixture must cross the band: {prev} -> {curr}"
    );

    let decision = strat.evaluate(&bars(&closes));
    assert_eq!(decision.signal_type, SignalType::Sell);
    assert_eq!(decision.reason, "RSI overbought crossover");
}

#[test]
fn rsi_with_period_plus_one_bars_holds() {
    let registry = StrategyRegistry::with_builtins();
    let strat = registry
        .build(&json!({
            "kind": "rsi_reversal",
            "period": 14,
            "oversold": 30,
            "overbought": 70,
        }))
        .expect("build");

    let closes: Vec<Decimal> = (0..15).map(|i| Decimal::from(100 + i)).collect();
    let decision = strat.evaluate(&bars(&closes));
    assert_eq!(decision.signal_type, SignalType::Hold);
    assert_eq!(decision.reason, "insufficient data");
}
