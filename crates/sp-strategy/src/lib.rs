//! Strategy evaluation: indicator library, evaluator variants, registry,
//! signal policy.
//!
//! Evaluators are a closed set registered by kind name at construction time.
//! Each evaluation builds a fresh evaluator from the strategy version's
//! params, feeds it an ordered bar window, and gets back a
//! [`SignalDecision`] — pure data, no IO.

mod engine;
mod indicators;
mod ma_crossover;
mod policy;
mod registry;
mod rsi_reversal;

pub use engine::{SignalDecision, StrategyContext, StrategyEvaluator};
pub use indicators::{rsi_series, sma, sma_ending_at};
pub use ma_crossover::MaCrossover;
pub use policy::{PolicyRejection, PolicyVerdict, SignalPolicy};
pub use registry::{StrategyBuildError, StrategyRegistry};
pub use rsi_reversal::RsiReversal;
