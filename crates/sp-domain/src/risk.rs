//! Risk rules, risk state, kill switch.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RiskScope
// ---------------------------------------------------------------------------

/// Rule applicability. Most-specific wins: PER_SYMBOL > PER_ACCOUNT > GLOBAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskScope {
    Global,
    PerAccount,
    PerSymbol,
}

impl RiskScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskScope::Global => "GLOBAL",
            RiskScope::PerAccount => "PER_ACCOUNT",
            RiskScope::PerSymbol => "PER_SYMBOL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GLOBAL" => Some(RiskScope::Global),
            "PER_ACCOUNT" => Some(RiskScope::PerAccount),
            "PER_SYMBOL" => Some(RiskScope::PerSymbol),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// RiskRule
// ---------------------------------------------------------------------------

/// Pre-trade limits at one scope. `None` fields fall through to the next
/// less-specific rule during resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRule {
    pub rule_id: String,
    pub scope: RiskScope,
    pub account_id: Option<String>,
    pub symbol: Option<String>,
    pub max_position_value_per_symbol: Option<Decimal>,
    pub max_open_orders: Option<i64>,
    pub max_orders_per_minute: Option<i64>,
    pub daily_loss_limit: Option<Decimal>,
    pub consecutive_order_failures_limit: Option<i64>,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// KillSwitchState
// ---------------------------------------------------------------------------

/// Safety latch. ON blocks every transition to SENT until an operator
/// explicitly releases it; release is never automatic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillSwitchState {
    Off,
    Armed,
    On,
}

impl KillSwitchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KillSwitchState::Off => "OFF",
            KillSwitchState::Armed => "ARMED",
            KillSwitchState::On => "ON",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OFF" => Some(KillSwitchState::Off),
            "ARMED" => Some(KillSwitchState::Armed),
            "ON" => Some(KillSwitchState::On),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// RiskState
// ---------------------------------------------------------------------------

/// Scope key for the global risk-state row.
pub const GLOBAL_SCOPE_KEY: &str = "GLOBAL";

/// Mutable risk bookkeeping for one scope (global, or one account). The
/// database row is authoritative; in-process copies are caches and are
/// discardable on restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    /// `GLOBAL_SCOPE_KEY` or an account id.
    pub scope_key: String,
    pub kill_switch: KillSwitchState,
    pub kill_switch_reason: Option<String>,
    /// Realized PnL accumulated since the last local-midnight reset.
    pub daily_pnl: Decimal,
    /// Local date `daily_pnl` belongs to; a later date on read resets it.
    pub pnl_date: NaiveDate,
    pub consecutive_failures: i64,
    /// Rolling submission timestamps; entries older than 60s are purged on
    /// read by [`RiskState::purge_order_timestamps`].
    pub recent_order_timestamps: Vec<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RiskState {
    /// Fresh state for a scope that has no persisted row yet.
    pub fn new(scope_key: impl Into<String>, today: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            scope_key: scope_key.into(),
            kill_switch: KillSwitchState::Off,
            kill_switch_reason: None,
            daily_pnl: Decimal::ZERO,
            pnl_date: today,
            consecutive_failures: 0,
            recent_order_timestamps: Vec::new(),
            updated_at: now,
        }
    }

    /// Drop order timestamps older than the rolling 60s window and return
    /// how many remain.
    pub fn purge_order_timestamps(&mut self, now: DateTime<Utc>) -> usize {
        let floor = now - Duration::seconds(60);
        self.recent_order_timestamps.retain(|t| *t > floor);
        self.recent_order_timestamps.len()
    }

    /// Reset `daily_pnl` if the local trading date has rolled over.
    pub fn roll_pnl_date(&mut self, today: NaiveDate) {
        if today != self.pnl_date {
            self.pnl_date = today;
            self.daily_pnl = Decimal::ZERO;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn purge_keeps_only_last_60s() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 10, 1, 1).unwrap();
        let mut st = RiskState::new(GLOBAL_SCOPE_KEY, now.date_naive(), now);
        st.recent_order_timestamps = vec![
            now - Duration::seconds(120),
            now - Duration::seconds(61),
            now - Duration::seconds(60), // exactly at the edge: aged out
            now - Duration::seconds(59),
            now - Duration::seconds(1),
        ];
        assert_eq!(st.purge_order_timestamps(now), 2);
    }

    #[test]
    fn pnl_resets_on_date_rollover() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 23, 59, 0).unwrap();
        let mut st = RiskState::new(GLOBAL_SCOPE_KEY, now.date_naive(), now);
        st.daily_pnl = Decimal::new(-4200, 2);
        st.roll_pnl_date(now.date_naive());
        assert_eq!(st.daily_pnl, Decimal::new(-4200, 2));
        st.roll_pnl_date(now.date_naive().succ_opt().unwrap());
        assert_eq!(st.daily_pnl, Decimal::ZERO);
    }
}
