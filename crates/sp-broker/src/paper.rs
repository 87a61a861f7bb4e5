//! PAPER broker: deterministic in-memory simulated brokerage.
//!
//! The production default until LIVE is explicitly promoted. Submits are
//! idempotent on the client order id; every accepted order fills in full —
//! LIMIT at its limit price, MARKET at the mark supplied by the price
//! source. Fill ids are derived from the broker order number, so a replayed
//! submit cannot produce a second fill.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::debug;

use sp_domain::{Fill, Tick};

use crate::adapter::{
    BrokerAck, BrokerAdapter, FillHandler, OrderTicket, SubscriptionId, TickHandler,
};
use crate::error::{BrokerError, BrokerErrorKind};

/// Supplies the mark price for MARKET orders (typically the latest-tick
/// cache). LIMIT orders fill at their own price and never consult this.
pub type PriceSource = Arc<dyn Fn(&str) -> Option<Decimal> + Send + Sync>;

struct PaperOrder {
    ticket: OrderTicket,
    broker_order_no: String,
    cancelled: bool,
}

struct FillSub {
    account_id: String,
    handler: FillHandler,
}

#[derive(Default)]
struct PaperInner {
    /// Keyed by client order id for idempotent re-submit.
    orders: Mutex<HashMap<String, PaperOrder>>,
    fill_subs: Mutex<HashMap<u64, FillSub>>,
    tick_subs: Mutex<HashMap<u64, (Vec<String>, TickHandler)>>,
}

#[derive(Clone)]
pub struct PaperBroker {
    inner: Arc<PaperInner>,
    price_source: PriceSource,
    next_no: Arc<AtomicU64>,
    next_sub: Arc<AtomicU64>,
}

impl PaperBroker {
    pub fn new(price_source: PriceSource) -> Self {
        Self {
            inner: Arc::new(PaperInner::default()),
            price_source,
            next_no: Arc::new(AtomicU64::new(0)),
            next_sub: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Forward a real tick into paper tick subscriptions (the paper variant
    /// rides the live market-data stream when one is attached).
    pub fn emit_tick(&self, tick: Tick) {
        let subs = self.inner.tick_subs.lock();
        for (symbols, handler) in subs.values() {
            if symbols.iter().any(|s| s == &tick.symbol) {
                handler(tick.clone());
            }
        }
    }

    fn deliver_fill(&self, fill: Fill) {
        let subs = self.inner.fill_subs.lock();
        for sub in subs.values() {
            if sub.account_id == fill.account_id {
                (sub.handler)(fill.clone());
            }
        }
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    async fn place_order(&self, ticket: &OrderTicket) -> Result<BrokerAck, BrokerError> {
        // Idempotent re-submit: same client order id returns the original
        // ack without a second fill.
        if let Some(existing) = self.inner.orders.lock().get(&ticket.order_id) {
            return Ok(BrokerAck {
                broker_order_no: existing.broker_order_no.clone(),
            });
        }

        let fill_price = match ticket.price {
            Some(limit) => limit,
            None => (self.price_source)(&ticket.symbol).ok_or_else(|| {
                BrokerError::new(
                    BrokerErrorKind::InvalidRequest,
                    format!("no mark price for MARKET order on {}", ticket.symbol),
                )
            })?,
        };

        let no = self.next_no.fetch_add(1, Ordering::SeqCst) + 1;
        let broker_order_no = format!("paper-{no}");

        self.inner.orders.lock().insert(
            ticket.order_id.clone(),
            PaperOrder {
                ticket: ticket.clone(),
                broker_order_no: broker_order_no.clone(),
                cancelled: false,
            },
        );
        debug!(order_id = %ticket.order_id, broker_order_no = %broker_order_no, "paper ack");

        // Full fill, delivered asynchronously so the submit path returns
        // before the fill handler runs (matching live stream timing).
        let fill = Fill {
            fill_id: format!("paper:fill:{broker_order_no}:1"),
            order_id: ticket.order_id.clone(),
            account_id: ticket.account_id.clone(),
            symbol: ticket.symbol.clone(),
            side: ticket.side,
            fill_qty: ticket.qty,
            fill_price,
            commission: None,
            fill_ts: Utc::now(),
        };
        let this = self.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            this.deliver_fill(fill);
        });

        Ok(BrokerAck { broker_order_no })
    }

    async fn cancel_order(&self, broker_order_no: &str) -> Result<(), BrokerError> {
        let mut orders = self.inner.orders.lock();
        match orders
            .values_mut()
            .find(|o| o.broker_order_no == broker_order_no)
        {
            Some(order) => {
                order.cancelled = true;
                Ok(())
            }
            None => Err(BrokerError::new(
                BrokerErrorKind::InvalidRequest,
                format!("unknown broker order {broker_order_no}"),
            )),
        }
    }

    async fn modify_order(
        &self,
        broker_order_no: &str,
        new_qty: Option<i64>,
        new_price: Option<Decimal>,
    ) -> Result<(), BrokerError> {
        let mut orders = self.inner.orders.lock();
        match orders
            .values_mut()
            .find(|o| o.broker_order_no == broker_order_no)
        {
            Some(order) if !order.cancelled => {
                if let Some(q) = new_qty {
                    order.ticket.qty = q;
                }
                if let Some(p) = new_price {
                    order.ticket.price = Some(p);
                }
                Ok(())
            }
            Some(_) => Err(BrokerError::new(
                BrokerErrorKind::OrderRejected,
                "order already cancelled",
            )),
            None => Err(BrokerError::new(
                BrokerErrorKind::InvalidRequest,
                format!("unknown broker order {broker_order_no}"),
            )),
        }
    }

    async fn subscribe_ticks(
        &self,
        symbols: &[String],
        handler: TickHandler,
    ) -> Result<SubscriptionId, BrokerError> {
        let id = self.next_sub.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .tick_subs
            .lock()
            .insert(id, (symbols.to_vec(), handler));
        Ok(SubscriptionId(id))
    }

    async fn subscribe_fills(
        &self,
        account_id: &str,
        handler: FillHandler,
    ) -> Result<SubscriptionId, BrokerError> {
        let id = self.next_sub.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.fill_subs.lock().insert(
            id,
            FillSub {
                account_id: account_id.to_string(),
                handler,
            },
        );
        Ok(SubscriptionId(id))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError> {
        self.inner.tick_subs.lock().remove(&id.0);
        self.inner.fill_subs.lock().remove(&id.0);
        Ok(())
    }
}
