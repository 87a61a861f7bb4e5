//! The broker capability set shared by STUB / PAPER / LIVE variants.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use sp_domain::{Fill, OrderType, Side, Tick};

use crate::error::BrokerError;

/// Invoked per tick from adapter-owned delivery tasks. Handlers must be
/// cheap and non-blocking; anything heavier hands off to a channel.
pub type TickHandler = Arc<dyn Fn(Tick) + Send + Sync>;

/// Invoked per execution report from adapter-owned delivery tasks.
pub type FillHandler = Arc<dyn Fn(Fill) + Send + Sync>;

/// Opaque handle for tearing down a stream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Everything the broker needs to submit one order. A projection of the
/// domain `Order`, minted inside the placement transaction.
#[derive(Debug, Clone)]
pub struct OrderTicket {
    /// Application order id, echoed back as the client order id.
    pub order_id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: i64,
    /// None for MARKET.
    pub price: Option<Decimal>,
}

/// Successful submit acknowledgement.
#[derive(Debug, Clone)]
pub struct BrokerAck {
    pub broker_order_no: String,
}

#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Synchronous submit. Retryable failures are already retried inside the
    /// adapter per the shared policy; what comes back is final.
    async fn place_order(&self, ticket: &OrderTicket) -> Result<BrokerAck, BrokerError>;

    async fn cancel_order(&self, broker_order_no: &str) -> Result<(), BrokerError>;

    async fn modify_order(
        &self,
        broker_order_no: &str,
        new_qty: Option<i64>,
        new_price: Option<Decimal>,
    ) -> Result<(), BrokerError>;

    async fn subscribe_ticks(
        &self,
        symbols: &[String],
        handler: TickHandler,
    ) -> Result<SubscriptionId, BrokerError>;

    async fn subscribe_fills(
        &self,
        account_id: &str,
        handler: FillHandler,
    ) -> Result<SubscriptionId, BrokerError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError>;
}
