//! Order lifecycle legality.
//!
//! ```text
//!            NEW ──► SENT ──► ACCEPTED ──► PART_FILLED ──► FILLED (term.)
//!             │        │          │             │ ▲  │
//!             │        │          │             └─┘  └──► CANCELLED (term.)
//!             │        └──────────┴───► FILLED / CANCELLED / REJECTED
//!             └──► REJECTED (term.)   (fills may land while a cancel is
//!                                      in flight at the venue)
//! ```
//!
//! An illegal transition is an OMS inconsistency, treated as a halt/alert
//! signal by callers, never silently applied.

use sp_domain::OrderStatus;

/// True iff `from → to` is a legal lifecycle transition.
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (New, Sent)
            | (New, Rejected)
            | (New, Cancelled)
            | (Sent, Accepted)
            | (Sent, Rejected)
            | (Sent, PartFilled)
            | (Sent, Filled)
            | (Sent, Cancelled)
            | (Accepted, PartFilled)
            | (Accepted, Filled)
            | (Accepted, Cancelled)
            | (Accepted, Rejected)
            | (PartFilled, PartFilled)
            | (PartFilled, Filled)
            | (PartFilled, Cancelled)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sp_domain::OrderStatus::*;

    #[test]
    fn happy_paths_are_legal() {
        assert!(can_transition(New, Sent));
        assert!(can_transition(Sent, Accepted));
        assert!(can_transition(Accepted, PartFilled));
        assert!(can_transition(PartFilled, PartFilled));
        assert!(can_transition(PartFilled, Filled));
    }

    #[test]
    fn rejects_and_cancels() {
        assert!(can_transition(New, Rejected));
        assert!(can_transition(Sent, Rejected));
        assert!(can_transition(PartFilled, Cancelled));
        assert!(can_transition(Sent, Cancelled));
    }

    #[test]
    fn terminal_states_exit_nowhere() {
        for term in [Filled, Rejected, Cancelled] {
            for to in [New, Sent, Accepted, PartFilled, Filled, Rejected, Cancelled] {
                assert!(!can_transition(term, to), "{term:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn no_backwards_motion() {
        assert!(!can_transition(Sent, New));
        assert!(!can_transition(Accepted, Sent));
        assert!(!can_transition(PartFilled, Accepted));
        assert!(!can_transition(PartFilled, Rejected));
    }
}
