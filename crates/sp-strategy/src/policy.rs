//! Signal policy: decides which raw decisions become actionable signals.
//!
//! Gates, in order: HOLD filter → TTL → duplicate (same type within the
//! cooldown window) → cooldown (any type within the window). Acceptance
//! state is in-memory only; losing it on restart just means one extra
//! cooldown window of caution.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use sp_domain::{Signal, SignalType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyRejection {
    /// HOLD decisions are discarded silently.
    Hold,
    /// `now - generated_at` exceeded the signal's TTL.
    Expired,
    /// Identical (strategy, symbol, type) accepted within the window.
    Duplicate,
    /// Any signal for (strategy, symbol) accepted within the window.
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyVerdict {
    Accept,
    Reject(PolicyRejection),
}

#[derive(Default)]
struct ScopeState {
    last_any: Option<DateTime<Utc>>,
    last_by_type: HashMap<SignalType, DateTime<Utc>>,
}

#[derive(Default)]
pub struct SignalPolicy {
    state: Mutex<HashMap<(String, String), ScopeState>>,
}

impl SignalPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate one signal. Accepted signals are recorded immediately, so a
    /// second identical signal in the same instant is already a duplicate.
    pub fn decide(&self, signal: &Signal, cooldown_seconds: i64, now: DateTime<Utc>) -> PolicyVerdict {
        if signal.signal_type == SignalType::Hold {
            return PolicyVerdict::Reject(PolicyRejection::Hold);
        }

        if now - signal.generated_at > Duration::seconds(signal.ttl_seconds) {
            return PolicyVerdict::Reject(PolicyRejection::Expired);
        }

        let key = (signal.strategy_id.clone(), signal.symbol.clone());
        let window = Duration::seconds(cooldown_seconds);
        let mut state = self.state.lock();
        let scope = state.entry(key).or_default();

        if let Some(last) = scope.last_by_type.get(&signal.signal_type) {
            if now - *last < window {
                return PolicyVerdict::Reject(PolicyRejection::Duplicate);
            }
        }

        if let Some(last) = scope.last_any {
            if now - last < window {
                return PolicyVerdict::Reject(PolicyRejection::Cooldown);
            }
        }

        scope.last_any = Some(now);
        scope.last_by_type.insert(signal.signal_type, now);
        PolicyVerdict::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sp_domain::new_id;

    fn signal(signal_type: SignalType, generated_at: DateTime<Utc>, ttl: i64) -> Signal {
        Signal {
            signal_id: new_id(),
            strategy_id: "strat-1".into(),
            symbol: "005930".into(),
            signal_type,
            reason: "test".into(),
            generated_at,
            ttl_seconds: ttl,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap()
    }

    #[test]
    fn hold_is_dropped() {
        let p = SignalPolicy::new();
        assert_eq!(
            p.decide(&signal(SignalType::Hold, now(), 60), 300, now()),
            PolicyVerdict::Reject(PolicyRejection::Hold)
        );
    }

    #[test]
    fn expired_signal_rejected() {
        let p = SignalPolicy::new();
        let generated = now() - Duration::seconds(61);
        assert_eq!(
            p.decide(&signal(SignalType::Buy, generated, 60), 300, now()),
            PolicyVerdict::Reject(PolicyRejection::Expired)
        );
        // Exactly at the TTL edge still passes.
        let generated = now() - Duration::seconds(60);
        assert_eq!(
            p.decide(&signal(SignalType::Buy, generated, 60), 300, now()),
            PolicyVerdict::Accept
        );
    }

    #[test]
    fn duplicate_same_type_within_window() {
        let p = SignalPolicy::new();
        assert_eq!(p.decide(&signal(SignalType::Buy, now(), 60), 300, now()), PolicyVerdict::Accept);
        let later = now() + Duration::seconds(30);
        assert_eq!(
            p.decide(&signal(SignalType::Buy, later, 60), 300, later),
            PolicyVerdict::Reject(PolicyRejection::Duplicate)
        );
    }

    #[test]
    fn different_type_within_window_is_cooldown() {
        let p = SignalPolicy::new();
        assert_eq!(p.decide(&signal(SignalType::Buy, now(), 60), 300, now()), PolicyVerdict::Accept);
        let later = now() + Duration::seconds(30);
        assert_eq!(
            p.decide(&signal(SignalType::Sell, later, 60), 300, later),
            PolicyVerdict::Reject(PolicyRejection::Cooldown)
        );
    }

    #[test]
    fn window_expiry_allows_again() {
        let p = SignalPolicy::new();
        assert_eq!(p.decide(&signal(SignalType::Buy, now(), 60), 300, now()), PolicyVerdict::Accept);
        let later = now() + Duration::seconds(300);
        assert_eq!(
            p.decide(&signal(SignalType::Buy, later, 60), 300, later),
            PolicyVerdict::Accept
        );
    }

    #[test]
    fn scopes_are_independent() {
        let p = SignalPolicy::new();
        assert_eq!(p.decide(&signal(SignalType::Buy, now(), 60), 300, now()), PolicyVerdict::Accept);
        let mut other = signal(SignalType::Buy, now(), 60);
        other.symbol = "000660".into();
        assert_eq!(p.decide(&other, 300, now()), PolicyVerdict::Accept);
    }
}
