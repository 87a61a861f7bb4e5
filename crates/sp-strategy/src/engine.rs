//! Evaluation contract shared by all strategy variants.

use rust_decimal::Decimal;
use sp_domain::{Bar, SignalType};

/// Deterministic inputs for one evaluation: an ordered (oldest→newest) bar
/// window. No IO handles, no clock — the scheduler owns both.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub bars: Vec<Bar>,
}

impl StrategyContext {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self { bars }
    }

    /// Closing prices, oldest first.
    pub fn closes(&self) -> Vec<Decimal> {
        self.bars.iter().map(|b| b.close).collect()
    }
}

/// What an evaluator concluded. HOLD decisions never leave the signal
/// policy.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDecision {
    pub signal_type: SignalType,
    /// In [0, 1].
    pub confidence: Decimal,
    pub reason: String,
}

impl SignalDecision {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            signal_type: SignalType::Hold,
            confidence: Decimal::ZERO,
            reason: reason.into(),
        }
    }
}

/// A strategy variant. Implementations are pure functions of the context;
/// construction (from the version's params) is the only place configuration
/// enters.
pub trait StrategyEvaluator: Send + Sync + std::fmt::Debug {
    /// Registry kind name, e.g. `"ma_crossover"`.
    fn kind(&self) -> &'static str;

    /// Bars the scheduler should load for one evaluation.
    fn required_bars(&self) -> usize;

    /// Signal expiry used by the signal policy TTL gate.
    fn ttl_seconds(&self) -> i64;

    /// Per-(strategy, symbol) acceptance cooldown.
    fn cooldown_seconds(&self) -> i64;

    /// Order quantity for accepted signals.
    fn order_qty(&self) -> i64;

    fn evaluate(&self, ctx: &StrategyContext) -> SignalDecision;
}
