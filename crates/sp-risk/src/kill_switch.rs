//! Kill-switch state machine.
//!
//! OFF → ARMED by operator action (or a configured warning threshold);
//! OFF/ARMED → ON automatically on a daily-loss or consecutive-failures
//! breach, or manually; ON → OFF only by explicit operator action. Every
//! transition carries a reason and is recorded on the state row; the caller
//! emits the matching outbox event in the same transaction.

use rust_decimal::Decimal;
use sp_domain::{KillSwitchState, RiskRule, RiskState};

pub const TRIGGER_DAILY_LOSS_LIMIT: &str = "DAILY_LOSS_LIMIT";
pub const TRIGGER_CONSECUTIVE_FAILURES: &str = "CONSECUTIVE_FAILURES";

/// A performed transition, for event emission.
#[derive(Debug, Clone, PartialEq)]
pub struct KillSwitchTransition {
    pub from: KillSwitchState,
    pub to: KillSwitchState,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillSwitchError {
    /// The requested manual transition is not legal (e.g. ON → ARMED).
    IllegalTransition {
        from: KillSwitchState,
        to: KillSwitchState,
    },
}

impl std::fmt::Display for KillSwitchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillSwitchError::IllegalTransition { from, to } => write!(
                f,
                "illegal kill-switch transition: {} -> {}",
                from.as_str(),
                to.as_str()
            ),
        }
    }
}

impl std::error::Error for KillSwitchError {}

/// Check the automatic triggers after a state mutation (realized-PnL update
/// or failure-count increment). Trips to ON and returns the transition when
/// a breach holds; no-op when already ON.
pub fn auto_trip(state: &mut RiskState, rule: &RiskRule) -> Option<KillSwitchTransition> {
    if state.kill_switch == KillSwitchState::On {
        return None;
    }

    if let Some(limit) = rule.daily_loss_limit {
        if limit > Decimal::ZERO && state.daily_pnl <= -limit {
            return Some(trip(state, TRIGGER_DAILY_LOSS_LIMIT));
        }
    }

    if let Some(limit) = rule.consecutive_order_failures_limit {
        if state.consecutive_failures >= limit {
            return Some(trip(state, TRIGGER_CONSECUTIVE_FAILURES));
        }
    }

    None
}

fn trip(state: &mut RiskState, reason: &str) -> KillSwitchTransition {
    let from = state.kill_switch;
    state.kill_switch = KillSwitchState::On;
    state.kill_switch_reason = Some(reason.to_string());
    KillSwitchTransition {
        from,
        to: KillSwitchState::On,
        reason: reason.to_string(),
    }
}

/// Apply an explicit operator transition.
///
/// Legal: OFF → ARMED/ON, ARMED → ON/OFF, ON → OFF. Same-state requests are
/// no-ops (None). Release (→ OFF) clears the recorded reason.
pub fn manual_set(
    state: &mut RiskState,
    to: KillSwitchState,
    reason: &str,
) -> Result<Option<KillSwitchTransition>, KillSwitchError> {
    use KillSwitchState::*;

    let from = state.kill_switch;
    if from == to {
        return Ok(None);
    }

    let legal = matches!(
        (from, to),
        (Off, Armed) | (Off, On) | (Armed, On) | (Armed, Off) | (On, Off)
    );
    if !legal {
        return Err(KillSwitchError::IllegalTransition { from, to });
    }

    state.kill_switch = to;
    state.kill_switch_reason = match to {
        Off => None,
        _ => Some(reason.to_string()),
    };

    Ok(Some(KillSwitchTransition {
        from,
        to,
        reason: reason.to_string(),
    }))
}
