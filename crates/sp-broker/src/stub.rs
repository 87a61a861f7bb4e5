//! STUB broker: synthetic ticks on a timer, every order acked.
//!
//! Default for tests. Orders never auto-fill; tests inject fills through
//! [`StubBroker::emit_fill`] so fill-path behavior stays deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::debug;

use sp_domain::{Fill, Tick};

use crate::adapter::{
    BrokerAck, BrokerAdapter, FillHandler, OrderTicket, SubscriptionId, TickHandler,
};
use crate::error::BrokerError;

struct TickSub {
    symbols: Vec<String>,
    handler: TickHandler,
}

struct FillSub {
    account_id: String,
    handler: FillHandler,
}

#[derive(Default)]
struct StubInner {
    tick_subs: Mutex<HashMap<u64, TickSub>>,
    fill_subs: Mutex<HashMap<u64, FillSub>>,
    /// Acked tickets by broker_order_no, for test introspection.
    orders: Mutex<HashMap<String, OrderTicket>>,
    /// Synthetic random-walk price per symbol.
    prices: Mutex<HashMap<String, Decimal>>,
}

#[derive(Clone, Default)]
pub struct StubBroker {
    inner: Arc<StubInner>,
    next_order_no: Arc<AtomicU64>,
    next_sub_id: Arc<AtomicU64>,
}

impl StubBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive synthetic ticks for `symbols` every `interval`. Prices start at
    /// `base_price` and take small random steps.
    pub fn spawn_tick_generator(
        &self,
        symbols: Vec<String>,
        base_price: Decimal,
        interval: Duration,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        {
            let mut prices = inner.prices.lock();
            for s in &symbols {
                prices.entry(s.clone()).or_insert(base_price);
            }
        }

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for symbol in &symbols {
                    let price = {
                        let mut prices = inner.prices.lock();
                        let slot = prices.entry(symbol.clone()).or_insert(base_price);
                        // ±0.2% random step, floored at 1.
                        let bps: i64 = rand::thread_rng().gen_range(-20..=20);
                        let next = *slot
                            + *slot * Decimal::new(bps, 4);
                        *slot = next.max(Decimal::ONE);
                        *slot
                    };
                    let tick = Tick {
                        symbol: symbol.clone(),
                        price,
                        volume: rand::thread_rng().gen_range(1..=500),
                        timestamp: Utc::now(),
                        status_code: "0".to_string(),
                    };
                    deliver_tick(&inner, &tick);
                }
            }
        })
    }

    /// Test hook: push one tick through the subscription path.
    pub fn emit_tick(&self, tick: Tick) {
        deliver_tick(&self.inner, &tick);
    }

    /// Test hook: deliver an execution report to fill subscribers of the
    /// fill's account.
    pub fn emit_fill(&self, fill: Fill) {
        let subs = self.inner.fill_subs.lock();
        for sub in subs.values() {
            if sub.account_id == fill.account_id {
                (sub.handler)(fill.clone());
            }
        }
    }

    /// Acked tickets, for assertions on broker traffic.
    pub fn acked_orders(&self) -> Vec<OrderTicket> {
        self.inner.orders.lock().values().cloned().collect()
    }
}

fn deliver_tick(inner: &StubInner, tick: &Tick) {
    let subs = inner.tick_subs.lock();
    for sub in subs.values() {
        if sub.symbols.iter().any(|s| s == &tick.symbol) {
            (sub.handler)(tick.clone());
        }
    }
}

#[async_trait]
impl BrokerAdapter for StubBroker {
    async fn place_order(&self, ticket: &OrderTicket) -> Result<BrokerAck, BrokerError> {
        let no = self.next_order_no.fetch_add(1, Ordering::SeqCst) + 1;
        let broker_order_no = format!("stub-{no}");
        self.inner
            .orders
            .lock()
            .insert(broker_order_no.clone(), ticket.clone());
        debug!(order_id = %ticket.order_id, broker_order_no = %broker_order_no, "stub ack");
        Ok(BrokerAck { broker_order_no })
    }

    async fn cancel_order(&self, broker_order_no: &str) -> Result<(), BrokerError> {
        self.inner.orders.lock().remove(broker_order_no);
        Ok(())
    }

    async fn modify_order(
        &self,
        broker_order_no: &str,
        new_qty: Option<i64>,
        new_price: Option<Decimal>,
    ) -> Result<(), BrokerError> {
        if let Some(ticket) = self.inner.orders.lock().get_mut(broker_order_no) {
            if let Some(q) = new_qty {
                ticket.qty = q;
            }
            if let Some(p) = new_price {
                ticket.price = Some(p);
            }
        }
        Ok(())
    }

    async fn subscribe_ticks(
        &self,
        symbols: &[String],
        handler: TickHandler,
    ) -> Result<SubscriptionId, BrokerError> {
        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.tick_subs.lock().insert(
            id,
            TickSub {
                symbols: symbols.to_vec(),
                handler,
            },
        );
        Ok(SubscriptionId(id))
    }

    async fn subscribe_fills(
        &self,
        account_id: &str,
        handler: FillHandler,
    ) -> Result<SubscriptionId, BrokerError> {
        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst) + 1;
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use sp_domain::{OrderType, Side};
    use std::sync::atomic::AtomicUsize;

    fn ticket() -> OrderTicket {
        OrderTicket {
            order_id: "ord-1".into(),
            account_id: "acct-1".into(),
            symbol: "005930".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            qty: 10,
            price: Some(dec!(70000)),
        }
    }

    #[tokio::test]
    async fn acks_every_order_with_unique_numbers() {
        let broker = StubBroker::new();
        let a = broker.place_order(&ticket()).await.unwrap();
        let b = broker.place_order(&ticket()).await.unwrap();
        assert_ne!(a.broker_order_no, b.broker_order_no);
        assert_eq!(broker.acked_orders().len(), 2);
    }

    #[tokio::test]
    async fn tick_subscription_filters_by_symbol() {
        let broker = StubBroker::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        broker
            .subscribe_ticks(
                &["005930".to_string()],
                Arc::new(move |_t| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap();
        let tick = |symbol: &str| Tick {
            symbol: symbol.into(),
            price: dec!(100),
            volume: 1,
            timestamp: ts,
            status_code: "0".into(),
        };
        broker.emit_tick(tick("005930"));
        broker.emit_tick(tick("000660"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broker = StubBroker::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let id = broker
            .subscribe_fills(
                "acct-1",
                Arc::new(move |_f| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        let fill = Fill {
            fill_id: "F1".into(),
            order_id: "ord-1".into(),
            account_id: "acct-1".into(),
            symbol: "005930".into(),
            side: Side::Buy,
            fill_qty: 10,
            fill_price: dec!(70000),
            commission: None,
            fill_ts: Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap(),
        };
        broker.emit_fill(fill.clone());
        broker.unsubscribe(id).await.unwrap();
        broker.emit_fill(fill);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
