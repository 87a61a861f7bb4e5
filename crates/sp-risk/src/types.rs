//! Risk-engine decision and input types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sp_domain::Side;

// ---------------------------------------------------------------------------
// RejectCode
// ---------------------------------------------------------------------------

/// Machine-readable rejection codes, one per check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectCode {
    KillSwitch,
    DailyLossLimit,
    MaxOpenOrders,
    OrderFrequencyLimit,
    PositionExposureLimit,
    ConsecutiveFailures,
    MarketClosed,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCode::KillSwitch => "KILL_SWITCH",
            RejectCode::DailyLossLimit => "DAILY_LOSS_LIMIT",
            RejectCode::MaxOpenOrders => "MAX_OPEN_ORDERS",
            RejectCode::OrderFrequencyLimit => "ORDER_FREQUENCY_LIMIT",
            RejectCode::PositionExposureLimit => "POSITION_EXPOSURE_LIMIT",
            RejectCode::ConsecutiveFailures => "CONSECUTIVE_FAILURES",
            RejectCode::MarketClosed => "MARKET_CLOSED",
        }
    }
}

// ---------------------------------------------------------------------------
// RiskDecision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approve,
    Reject { code: RejectCode, reason: String },
}

impl RiskDecision {
    pub fn reject(code: RejectCode, reason: impl Into<String>) -> Self {
        RiskDecision::Reject {
            code,
            reason: reason.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, RiskDecision::Approve)
    }
}

// ---------------------------------------------------------------------------
// RiskSnapshot
// ---------------------------------------------------------------------------

/// State materialized by the placement transaction before evaluation.
///
/// `kill_switch_on` is the OR of the global and per-account latches;
/// the counters come from the locked per-account state row after the 60s
/// purge has run.
#[derive(Debug, Clone)]
pub struct RiskSnapshot {
    pub kill_switch_on: bool,
    pub daily_pnl: Decimal,
    pub consecutive_failures: i64,
    /// Submission timestamps surviving the rolling-window purge.
    pub recent_order_count: usize,
    /// Orders in NEW / SENT / ACCEPTED / PART_FILLED for the account.
    pub open_orders: i64,
    /// Signed current position quantity for (account, symbol).
    pub position_qty: i64,
}

// ---------------------------------------------------------------------------
// OrderCheckInput
// ---------------------------------------------------------------------------

/// The order intent under evaluation.
#[derive(Debug, Clone)]
pub struct OrderCheckInput {
    pub side: Side,
    pub qty: i64,
    /// Limit price, or the latest tick for MARKET orders. Missing reference
    /// price fails the exposure check closed.
    pub ref_price: Option<Decimal>,
    /// `None` when the market-hours check is disabled by configuration.
    pub market_open: Option<bool>,
}
