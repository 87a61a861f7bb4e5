//! Pre-trade risk engine.
//!
//! The evaluator is a pure decision function: the placement use case
//! materializes a [`RiskSnapshot`] inside its transaction (locked risk-state
//! rows, open-order count, current position, reference price) and gets back
//! a structured [`RiskDecision`]. Rejections are values, never errors.

mod engine;
mod kill_switch;
mod types;

pub use engine::evaluate;
pub use kill_switch::{auto_trip, manual_set, KillSwitchError, KillSwitchTransition, TRIGGER_CONSECUTIVE_FAILURES, TRIGGER_DAILY_LOSS_LIMIT};
pub use types::{OrderCheckInput, RejectCode, RiskDecision, RiskSnapshot};
