//! Place / cancel / modify use cases.
//!
//! Each runs in one database transaction. The risk snapshot is materialized
//! under the locked risk-state rows, the broker is called synchronously
//! inside the flow, and every observable transition writes its outbox event
//! in the same transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info, warn};

use sp_broker::{BrokerAdapter, BrokerErrorKind, OrderTicket};
use sp_domain::{
    new_id, EventType, KillSwitchState, Order, OrderStatus, OrderType, OutboxEvent, RiskRule,
    RiskState, Side, GLOBAL_SCOPE_KEY,
};
use sp_hours::MarketCalendar;
use sp_risk::{auto_trip, evaluate, OrderCheckInput, RiskDecision, RiskSnapshot};

use crate::events::event_payload;
use crate::idempotency::derive_idempotency_key;

// ---------------------------------------------------------------------------
// Errors and deps
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum UseCaseError {
    /// Request-shape problems (zero qty, LIMIT without price, unknown
    /// order). Dropped with a log, never retried.
    #[error("invalid request: {0}")]
    Validation(String),
    /// The order is in a state the operation does not apply to.
    #[error("order {order_id} is {status} and cannot be {operation}")]
    IllegalState {
        order_id: String,
        status: &'static str,
        operation: &'static str,
    },
    /// Broker refusal of a cancel/modify; the order is left unchanged.
    #[error("broker refused: {0}")]
    BrokerRefused(String),
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

/// Collaborators for the order use cases, constructed once at startup.
pub struct OrderDeps {
    pub pool: PgPool,
    pub broker: std::sync::Arc<dyn BrokerAdapter>,
    /// None ⇒ the market-hours check is disabled by configuration.
    pub calendar: Option<MarketCalendar>,
    /// Latest-tick lookup for MARKET-order exposure projection.
    pub price_lookup: std::sync::Arc<dyn Fn(&str) -> Option<Decimal> + Send + Sync>,
    /// Fallback rule when no risk_rules row matches.
    pub default_rule: RiskRule,
}

// ---------------------------------------------------------------------------
// Place
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub account_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: i64,
    /// Required for LIMIT, absent for MARKET.
    pub price: Option<Decimal>,
    pub strategy_id: Option<String>,
    pub strategy_version_id: Option<String>,
    /// Caller-supplied replay discriminator for derived keys.
    pub nonce: String,
    /// Explicit key wins over derivation.
    pub idempotency_key: Option<String>,
}

impl PlaceOrderRequest {
    fn validate(&self) -> Result<(), UseCaseError> {
        if self.qty <= 0 {
            return Err(UseCaseError::Validation("qty must be positive".into()));
        }
        match (self.order_type, self.price) {
            (OrderType::Limit, None) => {
                return Err(UseCaseError::Validation("LIMIT order requires a price".into()))
            }
            (OrderType::Market, Some(_)) => {
                return Err(UseCaseError::Validation(
                    "MARKET order must not carry a price".into(),
                ))
            }
            (OrderType::Limit, Some(p)) if p <= Decimal::ZERO => {
                return Err(UseCaseError::Validation("price must be positive".into()))
            }
            _ => {}
        }
        if self.account_id.is_empty() || self.symbol.is_empty() {
            return Err(UseCaseError::Validation("account and symbol are required".into()));
        }
        Ok(())
    }
}

/// Place an order.
///
/// Returns the order record in its final state for this call: an existing
/// order on idempotent replay, REJECTED on risk rejection or terminal broker
/// failure, SENT on success. Risk rejection is a returned value, not an
/// error.
pub async fn place_order(
    deps: &OrderDeps,
    req: PlaceOrderRequest,
    now: DateTime<Utc>,
) -> Result<Order, UseCaseError> {
    req.validate()?;

    let key = req.idempotency_key.clone().unwrap_or_else(|| {
        derive_idempotency_key(
            &req.account_id,
            &req.symbol,
            req.side,
            req.order_type,
            req.qty,
            req.price,
            req.strategy_id.as_deref(),
            &req.nonce,
        )
    });

    let mut tx = deps.pool.begin().await.context("begin place tx")?;

    // Idempotent replay: same key returns the existing order untouched and
    // never reaches the broker again.
    if let Some(existing) = sp_db::orders::fetch_by_idempotency_key(&mut tx, &key).await? {
        info!(order_id = %existing.order_id, "idempotent replay, returning existing order");
        return Ok(existing);
    }

    let today = deps
        .calendar
        .as_ref()
        .map(|c| c.local_date(now))
        .unwrap_or_else(|| now.date_naive());

    // Lock order is fixed (GLOBAL then account) so concurrent placements
    // cannot deadlock on the risk-state rows.
    let global_state =
        sp_db::risk::ensure_state_for_update(&mut tx, GLOBAL_SCOPE_KEY, today).await?;
    let mut account_state =
        sp_db::risk::ensure_state_for_update(&mut tx, &req.account_id, today).await?;
    account_state.roll_pnl_date(today);
    let recent_order_count = account_state.purge_order_timestamps(now);

    let rule = sp_db::risk::resolve_rule(&mut tx, &req.account_id, &req.symbol)
        .await?
        .unwrap_or_else(|| deps.default_rule.clone());

    let open_orders = sp_db::orders::count_open_for_account(&mut tx, &req.account_id).await?;
    let position_qty = sp_db::positions::fetch(&mut tx, &req.account_id, &req.symbol)
        .await?
        .map(|p| p.qty)
        .unwrap_or(0);

    let snapshot = RiskSnapshot {
        kill_switch_on: global_state.kill_switch == KillSwitchState::On
            || account_state.kill_switch == KillSwitchState::On,
        daily_pnl: account_state.daily_pnl,
        consecutive_failures: account_state.consecutive_failures,
        recent_order_count,
        open_orders,
        position_qty,
    };
    let input = OrderCheckInput {
        side: req.side,
        qty: req.qty,
        ref_price: req
            .price
            .or_else(|| (deps.price_lookup)(&req.symbol)),
        market_open: deps.calendar.as_ref().map(|c| c.is_open(now)),
    };

    let order_id = new_id();
    let base_order = Order {
        order_id: order_id.clone(),
        account_id: req.account_id.clone(),
        strategy_id: req.strategy_id.clone(),
        strategy_version_id: req.strategy_version_id.clone(),
        symbol: req.symbol.clone(),
        side: req.side,
        order_type: req.order_type,
        qty: req.qty,
        price: req.price,
        status: OrderStatus::New,
        reject_code: None,
        reject_reason: None,
        idempotency_key: key,
        broker_order_no: None,
        filled_qty: 0,
        created_at: now,
        updated_at: now,
    };

    // Risk rejection: persist the order directly in REJECTED, emit the
    // event, commit, and return it. The broker is never contacted.
    if let RiskDecision::Reject { code, reason } = evaluate(&rule, &snapshot, &input) {
        let mut rejected = base_order;
        rejected.status = OrderStatus::Rejected;
        rejected.reject_code = Some(code.as_str().to_string());
        rejected.reject_reason = Some(reason.clone());

        sp_db::orders::insert(&mut tx, &rejected).await?;
        sp_db::outbox::enqueue(
            &mut tx,
            &OutboxEvent::pending(
                EventType::OrderRejected,
                event_payload(
                    &rejected.order_id,
                    now,
                    json!({
                        "account_id": rejected.account_id,
                        "symbol": rejected.symbol,
                        "code": code.as_str(),
                        "reason": reason,
                    }),
                ),
                now,
            ),
        )
        .await?;
        sp_db::risk::save_state(&mut tx, &stamped(account_state, now)).await?;
        tx.commit().await.context("commit risk-rejected place")?;

        warn!(order_id = %rejected.order_id, code = code.as_str(), "order rejected by risk");
        return Ok(rejected);
    }

    sp_db::orders::insert(&mut tx, &base_order).await?;
    sp_db::outbox::enqueue(
        &mut tx,
        &OutboxEvent::pending(
            EventType::OrderCreated,
            event_payload(
                &order_id,
                now,
                json!({
                    "account_id": req.account_id,
                    "symbol": req.symbol,
                    "side": req.side.as_str(),
                    "qty": req.qty,
                }),
            ),
            now,
        ),
    )
    .await?;

    // Synchronous broker dispatch. Retryable failures are retried inside the
    // adapter; what comes back is final.
    let ticket = OrderTicket {
        order_id: order_id.clone(),
        account_id: req.account_id.clone(),
        symbol: req.symbol.clone(),
        side: req.side,
        order_type: req.order_type,
        qty: req.qty,
        price: req.price,
    };

    match deps.broker.place_order(&ticket).await {
        Ok(ack) => {
            sp_db::orders::mark_sent(&mut tx, &order_id, &ack.broker_order_no, now).await?;
            sp_db::outbox::enqueue(
                &mut tx,
                &OutboxEvent::pending(
                    EventType::OrderSent,
                    event_payload(
                        &order_id,
                        now,
                        json!({"broker_order_no": ack.broker_order_no.clone()}),
                    ),
                    now,
                ),
            )
            .await?;

            // Success consumes frequency budget and clears the failure
            // streak.
            account_state.recent_order_timestamps.push(now);
            account_state.consecutive_failures = 0;
            sp_db::risk::save_state(&mut tx, &stamped(account_state, now)).await?;
            tx.commit().await.context("commit sent place")?;

            let mut order = base_order;
            order.status = OrderStatus::Sent;
            order.broker_order_no = Some(ack.broker_order_no);
            order.updated_at = now;
            Ok(order)
        }
        Err(e) => {
            let code = e.kind.as_str();
            sp_db::orders::mark_rejected(&mut tx, &order_id, code, &e.message, now).await?;
            sp_db::outbox::enqueue(
                &mut tx,
                &OutboxEvent::pending(
                    EventType::OrderRejected,
                    event_payload(&order_id, now, json!({"code": code, "reason": e.message.clone()})),
                    now,
                ),
            )
            .await?;

            // Authentication failures page the operator but do not feed the
            // failure streak: a credentials problem must not silently trip
            // the kill switch.
            if e.kind == BrokerErrorKind::Authentication {
                error!(order_id = %order_id, error = %e, "broker authentication failure");
            } else {
                account_state.consecutive_failures += 1;
                if let Some(transition) = auto_trip(&mut account_state, &rule) {
                    sp_db::outbox::enqueue(
                        &mut tx,
                        &OutboxEvent::pending(
                            EventType::KillSwitchTriggered,
                            event_payload(
                                &req.account_id,
                                now,
                                json!({"reason": transition.reason.clone(), "from": transition.from.as_str()}),
                            ),
                            now,
                        ),
                    )
                    .await?;
                    error!(account_id = %req.account_id, reason = %transition.reason, "kill switch tripped");
                }
            }
            sp_db::risk::save_state(&mut tx, &stamped(account_state, now)).await?;
            tx.commit().await.context("commit broker-failed place")?;

            let mut order = base_order;
            order.status = OrderStatus::Rejected;
            order.reject_code = Some(code.to_string());
            order.reject_reason = Some(e.message.clone());
            order.updated_at = now;
            warn!(order_id = %order.order_id, code, "broker rejected order");
            Ok(order)
        }
    }
}

fn stamped(mut state: RiskState, now: DateTime<Utc>) -> RiskState {
    state.updated_at = now;
    state
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// Cancel a working order. Broker refusal leaves the order untouched and
/// surfaces to the caller.
pub async fn cancel_order(
    deps: &OrderDeps,
    order_id: &str,
    now: DateTime<Utc>,
) -> Result<Order, UseCaseError> {
    let mut tx = deps.pool.begin().await.context("begin cancel tx")?;

    let order = sp_db::orders::fetch_for_update(&mut tx, order_id)
        .await?
        .ok_or_else(|| UseCaseError::Validation(format!("unknown order {order_id}")))?;

    if !order.status.is_cancellable() {
        return Err(UseCaseError::IllegalState {
            order_id: order.order_id,
            status: order.status.as_str(),
            operation: "cancelled",
        });
    }
    let broker_order_no = order
        .broker_order_no
        .clone()
        .ok_or_else(|| UseCaseError::Validation("order has no broker reference".into()))?;

    deps.broker
        .cancel_order(&broker_order_no)
        .await
        .map_err(|e| UseCaseError::BrokerRefused(e.to_string()))?;

    sp_db::orders::transition(
        &mut tx,
        order_id,
        &[OrderStatus::Sent, OrderStatus::Accepted, OrderStatus::PartFilled],
        OrderStatus::Cancelled,
        now,
    )
    .await?;
    sp_db::outbox::enqueue(
        &mut tx,
        &OutboxEvent::pending(
            EventType::OrderCancelled,
            event_payload(order_id, now, json!({"broker_order_no": broker_order_no})),
            now,
        ),
    )
    .await?;
    tx.commit().await.context("commit cancel")?;

    let mut cancelled = order;
    cancelled.status = OrderStatus::Cancelled;
    cancelled.updated_at = now;
    Ok(cancelled)
}

// ---------------------------------------------------------------------------
// Modify
// ---------------------------------------------------------------------------

/// Amend a working order's qty and/or price after the broker acks the
/// modification.
pub async fn modify_order(
    deps: &OrderDeps,
    order_id: &str,
    new_qty: Option<i64>,
    new_price: Option<Decimal>,
    now: DateTime<Utc>,
) -> Result<Order, UseCaseError> {
    if new_qty.is_none() && new_price.is_none() {
        return Err(UseCaseError::Validation("nothing to modify".into()));
    }
    if matches!(new_qty, Some(q) if q <= 0) {
        return Err(UseCaseError::Validation("new qty must be positive".into()));
    }

    let mut tx = deps.pool.begin().await.context("begin modify tx")?;

    let order = sp_db::orders::fetch_for_update(&mut tx, order_id)
        .await?
        .ok_or_else(|| UseCaseError::Validation(format!("unknown order {order_id}")))?;

    if !order.status.is_cancellable() {
        return Err(UseCaseError::IllegalState {
            order_id: order.order_id,
            status: order.status.as_str(),
            operation: "modified",
        });
    }
    if matches!(new_qty, Some(q) if q < order.filled_qty) {
        return Err(UseCaseError::Validation(format!(
            "new qty {} below already-filled {}",
            new_qty.unwrap_or_default(),
            order.filled_qty
        )));
    }
    let broker_order_no = order
        .broker_order_no
        .clone()
        .ok_or_else(|| UseCaseError::Validation("order has no broker reference".into()))?;

    deps.broker
        .modify_order(&broker_order_no, new_qty, new_price)
        .await
        .map_err(|e| UseCaseError::BrokerRefused(e.to_string()))?;

    sp_db::orders::record_modification(&mut tx, order_id, new_qty, new_price, now).await?;
    sp_db::outbox::enqueue(
        &mut tx,
        &OutboxEvent::pending(
            EventType::OrderModified,
            event_payload(
                order_id,
                now,
                json!({"new_qty": new_qty, "new_price": new_price}),
            ),
            now,
        ),
    )
    .await?;
    tx.commit().await.context("commit modify")?;

    let mut modified = order;
    if let Some(q) = new_qty {
        modified.qty = q;
    }
    if let Some(p) = new_price {
        modified.price = Some(p);
    }
    modified.updated_at = now;
    Ok(modified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> PlaceOrderRequest {
        PlaceOrderRequest {
            account_id: "acct-1".into(),
            symbol: "005930".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            qty: 10,
            price: Some(dec!(70000)),
            strategy_id: None,
            strategy_version_id: None,
            nonce: "n1".into(),
            idempotency_key: None,
        }
    }

    #[test]
    fn validation_guards() {
        let mut r = request();
        r.qty = 0;
        assert!(matches!(r.validate(), Err(UseCaseError::Validation(_))));

        let mut r = request();
        r.price = None;
        assert!(matches!(r.validate(), Err(UseCaseError::Validation(_))));

        let mut r = request();
        r.order_type = OrderType::Market;
        assert!(matches!(r.validate(), Err(UseCaseError::Validation(_))));
        r.price = None;
        assert!(r.validate().is_ok());

        assert!(request().validate().is_ok());
    }
}
