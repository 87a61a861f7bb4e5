//! Orders and fills.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Side / OrderType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }

    /// +1 for Buy, -1 for Sell. Used for signed position arithmetic.
    pub fn sign(&self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MARKET" => Some(OrderType::Market),
            "LIMIT" => Some(OrderType::Limit),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

/// Lifecycle states. Transition legality is enforced by the state machine in
/// `sp-execution`; this enum only carries the classification predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Sent,
    Accepted,
    PartFilled,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Sent => "SENT",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::PartFilled => "PART_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(OrderStatus::New),
            "SENT" => Some(OrderStatus::Sent),
            "ACCEPTED" => Some(OrderStatus::Accepted),
            "PART_FILLED" => Some(OrderStatus::PartFilled),
            "FILLED" => Some(OrderStatus::Filled),
            "REJECTED" => Some(OrderStatus::Rejected),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// No further transitions possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Cancelled
        )
    }

    /// Counted against the max-open-orders risk limit.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            OrderStatus::New | OrderStatus::Sent | OrderStatus::Accepted | OrderStatus::PartFilled
        )
    }

    /// Eligible for an explicit cancel request.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Sent | OrderStatus::Accepted | OrderStatus::PartFilled
        )
    }

    /// May legally receive further fills.
    pub fn can_fill(&self) -> bool {
        matches!(
            self,
            OrderStatus::Sent | OrderStatus::Accepted | OrderStatus::PartFilled
        )
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// An application-owned order. `broker_order_no` is a foreign reference into
/// the broker's namespace, set once the order reaches SENT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub account_id: String,
    /// Absent for operator-placed manual orders.
    pub strategy_id: Option<String>,
    pub strategy_version_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: i64,
    /// None for MARKET orders.
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    /// Machine-readable rejection code, set only in REJECTED.
    pub reject_code: Option<String>,
    pub reject_reason: Option<String>,
    /// UNIQUE; repeated placement with the same key returns this order.
    pub idempotency_key: String,
    pub broker_order_no: Option<String>,
    /// Denormalized Σ fill_qty, kept consistent with the fills table inside
    /// the fill-apply transaction.
    pub filled_qty: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Fill
// ---------------------------------------------------------------------------

/// A broker execution report. `fill_id` is broker-assigned and is the
/// deduplication key; accepted fills are immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub order_id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: Side,
    pub fill_qty: i64,
    pub fill_price: Decimal,
    /// Broker-reported commission, when the venue supplies one.
    pub commission: Option<Decimal>,
    pub fill_ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_predicates() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::PartFilled.is_terminal());

        assert!(OrderStatus::New.is_open());
        assert!(!OrderStatus::New.is_cancellable());
        assert!(OrderStatus::PartFilled.is_cancellable());
        assert!(OrderStatus::Sent.can_fill());
        assert!(!OrderStatus::Filled.can_fill());
    }

    #[test]
    fn status_round_trips_strings() {
        for st in [
            OrderStatus::New,
            OrderStatus::Sent,
            OrderStatus::Accepted,
            OrderStatus::PartFilled,
            OrderStatus::Filled,
            OrderStatus::Rejected,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(st.as_str()), Some(st));
        }
    }
}
