//! Rolling-window order frequency, end to end over state + evaluator:
//! submissions at t, t+10s, t+20s pass a 3/minute budget, t+30s is
//! rejected without consuming budget, and t+61s passes again after the
//! first timestamp ages out.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use sp_domain::{RiskRule, RiskScope, RiskState, Side};
use sp_risk::{evaluate, OrderCheckInput, RejectCode, RiskDecision, RiskSnapshot};

fn rule() -> RiskRule {
    RiskRule {
        rule_id: "rule-freq".into(),
        scope: RiskScope::PerAccount,
        account_id: Some("acct-1".into()),
        symbol: None,
        max_position_value_per_symbol: None,
        max_open_orders: None,
        max_orders_per_minute: Some(3),
        daily_loss_limit: None,
        consecutive_order_failures_limit: None,
        active: true,
    }
}

/// One placement attempt: purge, snapshot, evaluate, and append the
/// timestamp only on approval — the same sequence the place flow runs.
fn attempt(state: &mut RiskState, rule: &RiskRule, now: DateTime<Utc>) -> RiskDecision {
    let recent = state.purge_order_timestamps(now);
    let snapshot = RiskSnapshot {
        kill_switch_on: false,
        daily_pnl: Decimal::ZERO,
        consecutive_failures: 0,
        recent_order_count: recent,
        open_orders: 0,
        position_qty: 0,
    };
    let input = OrderCheckInput {
        side: Side::Buy,
        qty: 1,
        ref_price: Some(Decimal::from(70_000u64)),
        market_open: None,
    };
    let decision = evaluate(rule, &snapshot, &input);
    if decision.is_approved() {
        state.recent_order_timestamps.push(now);
    }
    decision
}

#[test]
fn budget_rejects_fourth_and_recovers_after_aging() {
    let t0 = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap();
    let mut state = RiskState::new("acct-1", t0.date_naive(), t0);
    let rule = rule();

    for offset in [0i64, 10, 20] {
        assert!(
            attempt(&mut state, &rule, t0 + Duration::seconds(offset)).is_approved(),
            "submission at t+{offset}s is within budget"
        );
    }

    let fourth = attempt(&mut state, &rule, t0 + Duration::seconds(30));
    assert_eq!(
        fourth,
        RiskDecision::reject(
            RejectCode::OrderFrequencyLimit,
            "3 orders in the last 60s >= limit 3"
        )
    );
    assert_eq!(
        state.recent_order_timestamps.len(),
        3,
        "rejection consumes no budget"
    );

    // At t+61s the t0 timestamp has aged out of the rolling window.
    let fifth = attempt(&mut state, &rule, t0 + Duration::seconds(61));
    assert!(fifth.is_approved());
    assert_eq!(state.recent_order_timestamps.len(), 3, "t+10, t+20, t+61");
}
