//! Outbox event taxonomy.
//!
//! Producers write these rows in the same transaction as the state change
//! they describe; the publisher in `sp-runtime` delivers them at-least-once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::new_id;

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    OrderCreated,
    OrderSent,
    OrderRejected,
    OrderCancelled,
    OrderModified,
    FillApplied,
    PositionUpdated,
    PnlUpdated,
    KillSwitchTriggered,
    KillSwitchReleased,
    StrategyActivated,
    StrategyDeactivated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "ORDER_CREATED",
            EventType::OrderSent => "ORDER_SENT",
            EventType::OrderRejected => "ORDER_REJECTED",
            EventType::OrderCancelled => "ORDER_CANCELLED",
            EventType::OrderModified => "ORDER_MODIFIED",
            EventType::FillApplied => "FILL_APPLIED",
            EventType::PositionUpdated => "POSITION_UPDATED",
            EventType::PnlUpdated => "PNL_UPDATED",
            EventType::KillSwitchTriggered => "KILL_SWITCH_TRIGGERED",
            EventType::KillSwitchReleased => "KILL_SWITCH_RELEASED",
            EventType::StrategyActivated => "STRATEGY_ACTIVATED",
            EventType::StrategyDeactivated => "STRATEGY_DEACTIVATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ORDER_CREATED" => Some(EventType::OrderCreated),
            "ORDER_SENT" => Some(EventType::OrderSent),
            "ORDER_REJECTED" => Some(EventType::OrderRejected),
            "ORDER_CANCELLED" => Some(EventType::OrderCancelled),
            "ORDER_MODIFIED" => Some(EventType::OrderModified),
            "FILL_APPLIED" => Some(EventType::FillApplied),
            "POSITION_UPDATED" => Some(EventType::PositionUpdated),
            "PNL_UPDATED" => Some(EventType::PnlUpdated),
            "KILL_SWITCH_TRIGGERED" => Some(EventType::KillSwitchTriggered),
            "KILL_SWITCH_RELEASED" => Some(EventType::KillSwitchReleased),
            "STRATEGY_ACTIVATED" => Some(EventType::StrategyActivated),
            "STRATEGY_DEACTIVATED" => Some(EventType::StrategyDeactivated),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// OutboxEvent
// ---------------------------------------------------------------------------

/// One pending or published outbox row. `published_at = None` ⇒ pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub payload_json: Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub poisoned: bool,
}

impl OutboxEvent {
    /// Build a pending event. Payloads always carry the entity id and a
    /// timestamp; callers add event-specific fields before enqueueing.
    pub fn pending(event_type: EventType, payload_json: Value, now: DateTime<Utc>) -> Self {
        Self {
            event_id: new_id(),
            event_type,
            payload_json,
            created_at: now,
            published_at: None,
            attempts: 0,
            poisoned: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips() {
        for et in [
            EventType::OrderCreated,
            EventType::OrderSent,
            EventType::OrderRejected,
            EventType::OrderCancelled,
            EventType::OrderModified,
            EventType::FillApplied,
            EventType::PositionUpdated,
            EventType::PnlUpdated,
            EventType::KillSwitchTriggered,
            EventType::KillSwitchReleased,
            EventType::StrategyActivated,
            EventType::StrategyDeactivated,
        ] {
            assert_eq!(EventType::parse(et.as_str()), Some(et));
        }
    }
}
