//! Strategy administration records and signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Strategy / StrategyVersion / StrategySymbol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyStatus {
    Inactive,
    Active,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Inactive => "INACTIVE",
            StrategyStatus::Active => "ACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INACTIVE" => Some(StrategyStatus::Inactive),
            "ACTIVE" => Some(StrategyStatus::Active),
            _ => None,
        }
    }
}

/// Execution environment for a strategy's orders. PAPER is the production
/// default; LIVE requires explicit promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeMode {
    Paper,
    Live,
}

impl TradeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeMode::Paper => "PAPER",
            TradeMode::Live => "LIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PAPER" => Some(TradeMode::Paper),
            "LIVE" => Some(TradeMode::Live),
            _ => None,
        }
    }
}

/// A registered strategy. Parameters live in versions; `active_version_id`
/// names the one the scheduler evaluates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub strategy_id: String,
    /// Unique. Also selects the evaluator kind via the registry
    /// (`kind` field inside the active version's params).
    pub name: String,
    pub status: StrategyStatus,
    pub mode: TradeMode,
    pub active_version_id: Option<String>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable parameter snapshot. `version_no` is monotone per strategy;
/// activating a new parameter set creates a new version and atomically swaps
/// the strategy's `active_version_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyVersion {
    pub version_id: String,
    pub strategy_id: String,
    pub version_no: i32,
    pub params_json: Value,
    pub created_at: DateTime<Utc>,
}

/// Fan-out mapping: which (symbol, account) pairs a strategy evaluates.
/// Unique on the triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySymbol {
    pub strategy_id: String,
    pub symbol: String,
    pub account_id: String,
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Buy => "BUY",
            SignalType::Sell => "SELL",
            SignalType::Hold => "HOLD",
        }
    }
}

/// A typed trading intent with an expiry. HOLD never travels past the signal
/// policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub signal_type: SignalType,
    pub reason: String,
    pub generated_at: DateTime<Utc>,
    pub ttl_seconds: i64,
}
