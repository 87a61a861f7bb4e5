//! The seven ordered pre-trade checks. First rejection short-circuits.

use rust_decimal::Decimal;

use sp_domain::RiskRule;

use crate::types::{OrderCheckInput, RejectCode, RiskDecision, RiskSnapshot};

/// Evaluate one order intent against the resolved rule and the materialized
/// snapshot. A `None` limit means "not constrained at this scope".
pub fn evaluate(rule: &RiskRule, snap: &RiskSnapshot, input: &OrderCheckInput) -> RiskDecision {
    // 1) Kill switch overrides everything.
    if snap.kill_switch_on {
        return RiskDecision::reject(RejectCode::KillSwitch, "kill switch is ON");
    }

    // 2) Daily PnL floor.
    if let Some(limit) = rule.daily_loss_limit {
        if limit > Decimal::ZERO && snap.daily_pnl <= -limit {
            return RiskDecision::reject(
                RejectCode::DailyLossLimit,
                format!("daily pnl {} breaches -{}", snap.daily_pnl, limit),
            );
        }
    }

    // 3) Open-order ceiling.
    if let Some(limit) = rule.max_open_orders {
        if snap.open_orders >= limit {
            return RiskDecision::reject(
                RejectCode::MaxOpenOrders,
                format!("{} open orders >= limit {}", snap.open_orders, limit),
            );
        }
    }

    // 4) Order frequency over the rolling 60s window (already purged).
    if let Some(limit) = rule.max_orders_per_minute {
        if snap.recent_order_count as i64 >= limit {
            return RiskDecision::reject(
                RejectCode::OrderFrequencyLimit,
                format!(
                    "{} orders in the last 60s >= limit {}",
                    snap.recent_order_count, limit
                ),
            );
        }
    }

    // 5) Projected position exposure. No reference price fails closed: an
    //    unpriceable MARKET order must not slip past the value limit.
    if let Some(limit) = rule.max_position_value_per_symbol {
        match input.ref_price {
            Some(price) => {
                let projected_qty = (snap.position_qty + input.side.sign() * input.qty).abs();
                let projected = Decimal::from(projected_qty) * price;
                if projected > limit {
                    return RiskDecision::reject(
                        RejectCode::PositionExposureLimit,
                        format!("projected exposure {projected} > limit {limit}"),
                    );
                }
            }
            None => {
                return RiskDecision::reject(
                    RejectCode::PositionExposureLimit,
                    "no reference price available for exposure projection",
                );
            }
        }
    }

    // 6) Consecutive broker failures.
    if let Some(limit) = rule.consecutive_order_failures_limit {
        if snap.consecutive_failures >= limit {
            return RiskDecision::reject(
                RejectCode::ConsecutiveFailures,
                format!(
                    "{} consecutive failures >= limit {}",
                    snap.consecutive_failures, limit
                ),
            );
        }
    }

    // 7) Market hours (None = check disabled).
    if input.market_open == Some(false) {
        return RiskDecision::reject(RejectCode::MarketClosed, "market is closed");
    }

    RiskDecision::Approve
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sp_domain::{RiskScope, Side};

    fn rule() -> RiskRule {
        RiskRule {
            rule_id: "rule-1".into(),
            scope: RiskScope::Global,
            account_id: None,
            symbol: None,
            max_position_value_per_symbol: Some(dec!(1000000)),
            max_open_orders: Some(5),
            max_orders_per_minute: Some(3),
            daily_loss_limit: Some(dec!(50000)),
            consecutive_order_failures_limit: Some(3),
            active: true,
        }
    }

    fn clean_snapshot() -> RiskSnapshot {
        RiskSnapshot {
            kill_switch_on: false,
            daily_pnl: Decimal::ZERO,
            consecutive_failures: 0,
            recent_order_count: 0,
            open_orders: 0,
            position_qty: 0,
        }
    }

    fn buy(qty: i64, price: Decimal) -> OrderCheckInput {
        OrderCheckInput {
            side: Side::Buy,
            qty,
            ref_price: Some(price),
            market_open: Some(true),
        }
    }

    fn code(d: &RiskDecision) -> Option<RejectCode> {
        match d {
            RiskDecision::Approve => None,
            RiskDecision::Reject { code, .. } => Some(*code),
        }
    }

    #[test]
    fn clean_state_approves() {
        assert!(evaluate(&rule(), &clean_snapshot(), &buy(1, dec!(100))).is_approved());
    }

    #[test]
    fn kill_switch_short_circuits_everything() {
        let mut snap = clean_snapshot();
        snap.kill_switch_on = true;
        // Everything else would also reject; kill switch must win.
        snap.daily_pnl = dec!(-99999999);
        snap.open_orders = 99;
        let d = evaluate(&rule(), &snap, &buy(1, dec!(100)));
        assert_eq!(code(&d), Some(RejectCode::KillSwitch));
    }

    #[test]
    fn daily_loss_at_and_past_floor() {
        let mut snap = clean_snapshot();
        snap.daily_pnl = dec!(-50000);
        let d = evaluate(&rule(), &snap, &buy(1, dec!(100)));
        assert_eq!(code(&d), Some(RejectCode::DailyLossLimit));

        snap.daily_pnl = dec!(-49999.99);
        assert!(evaluate(&rule(), &snap, &buy(1, dec!(100))).is_approved());
    }

    #[test]
    fn open_orders_at_limit_rejects() {
        let mut snap = clean_snapshot();
        snap.open_orders = 5;
        let d = evaluate(&rule(), &snap, &buy(1, dec!(100)));
        assert_eq!(code(&d), Some(RejectCode::MaxOpenOrders));
    }

    #[test]
    fn frequency_at_limit_rejects() {
        let mut snap = clean_snapshot();
        snap.recent_order_count = 3;
        let d = evaluate(&rule(), &snap, &buy(1, dec!(100)));
        assert_eq!(code(&d), Some(RejectCode::OrderFrequencyLimit));
    }

    #[test]
    fn exposure_projection_uses_signed_qty() {
        // Existing long 10 @ 70,000; BUY 10 more at 80,000 projects
        // 20 × 80,000 = 1,600,000 > 1,000,000.
        let mut snap = clean_snapshot();
        snap.position_qty = 10;
        let d = evaluate(&rule(), &snap, &buy(10, dec!(80000)));
        assert_eq!(code(&d), Some(RejectCode::PositionExposureLimit));

        // Selling the same 10 projects |10 - 10| = 0: fine.
        let sell = OrderCheckInput {
            side: Side::Sell,
            qty: 10,
            ref_price: Some(dec!(80000)),
            market_open: Some(true),
        };
        assert!(evaluate(&rule(), &snap, &sell).is_approved());
    }

    #[test]
    fn missing_reference_price_fails_closed() {
        let input = OrderCheckInput {
            side: Side::Buy,
            qty: 1,
            ref_price: None,
            market_open: Some(true),
        };
        let d = evaluate(&rule(), &clean_snapshot(), &input);
        assert_eq!(code(&d), Some(RejectCode::PositionExposureLimit));
    }

    #[test]
    fn consecutive_failures_at_limit_rejects() {
        let mut snap = clean_snapshot();
        snap.consecutive_failures = 3;
        let d = evaluate(&rule(), &snap, &buy(1, dec!(100)));
        assert_eq!(code(&d), Some(RejectCode::ConsecutiveFailures));
    }

    #[test]
    fn market_closed_rejects_but_disabled_check_passes() {
        let mut input = buy(1, dec!(100));
        input.market_open = Some(false);
        let d = evaluate(&rule(), &clean_snapshot(), &input);
        assert_eq!(code(&d), Some(RejectCode::MarketClosed));

        input.market_open = None;
        assert!(evaluate(&rule(), &clean_snapshot(), &input).is_approved());
    }

    #[test]
    fn checks_run_in_documented_order() {
        // Both daily-loss and frequency would reject; daily-loss is earlier.
        let mut snap = clean_snapshot();
        snap.daily_pnl = dec!(-50000);
        snap.recent_order_count = 99;
        let d = evaluate(&rule(), &snap, &buy(1, dec!(100)));
        assert_eq!(code(&d), Some(RejectCode::DailyLossLimit));
    }

    #[test]
    fn unconstrained_rule_approves_everything() {
        let open_rule = RiskRule {
            rule_id: "rule-open".into(),
            scope: RiskScope::Global,
            account_id: None,
            symbol: None,
            max_position_value_per_symbol: None,
            max_open_orders: None,
            max_orders_per_minute: None,
            daily_loss_limit: None,
            consecutive_order_failures_limit: None,
            active: true,
        };
        let mut snap = clean_snapshot();
        snap.open_orders = 999;
        snap.recent_order_count = 999;
        let mut input = buy(1_000_000, dec!(99999));
        input.ref_price = None;
        assert!(evaluate(&open_rule, &snap, &input).is_approved());
    }
}
