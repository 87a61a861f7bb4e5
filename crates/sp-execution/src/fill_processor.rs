//! Fill application.
//!
//! Invoked from the broker's fill subscription. An in-process
//! put-if-absent filter short-circuits duplicate deliveries cheaply; the
//! `fill_id` primary key is the durable dedupe that survives restarts. The
//! apply itself is one transaction: fill row, position upsert under the row
//! lock, ledger append, risk-state PnL accumulation (with kill-switch
//! trigger), order transition, and the outbox events.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone as _, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use tracing::{error, info, warn};

use sp_domain::{
    round_money, EventType, Fill, OrderStatus, OutboxEvent, Position, RiskRule,
};
use sp_risk::auto_trip;

use crate::accounting::apply_fill_to_position;
use crate::events::event_payload;
use crate::state_machine::can_transition;

// ---------------------------------------------------------------------------
// Validation bounds
// ---------------------------------------------------------------------------

const MIN_FILL_PRICE: i64 = 100;
const MAX_FILL_PRICE: i64 = 10_000_000;
const MIN_FILL_QTY: i64 = 1;
const MAX_FILL_QTY: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// DuplicateFilter
// ---------------------------------------------------------------------------

/// In-process fill_id → first-seen map. Capped at 10 000 entries with a
/// 1-hour TTL; `put_if_absent` decides single ownership of a delivery.
/// Discardable: after a restart the database unique key takes over.
pub struct DuplicateFilter {
    seen: Mutex<HashMap<String, Instant>>,
    cap: usize,
    ttl: Duration,
}

impl Default for DuplicateFilter {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(3600))
    }
}

impl DuplicateFilter {
    pub fn new(cap: usize, ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            cap,
            ttl,
        }
    }

    /// Returns true when this caller owns the fill (first sight), false for
    /// a duplicate.
    pub fn put_if_absent(&self, fill_id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock();

        if seen.len() >= self.cap {
            seen.retain(|_, at| now.duration_since(*at) < self.ttl);
            // Still saturated after the TTL sweep: drop the oldest entries.
            if seen.len() >= self.cap {
                let mut entries: Vec<(String, Instant)> =
                    seen.iter().map(|(k, v)| (k.clone(), *v)).collect();
                entries.sort_by_key(|(_, at)| *at);
                for (k, _) in entries.iter().take(seen.len() - self.cap / 2) {
                    seen.remove(k);
                }
            }
        }

        let fresh = match seen.get(fill_id) {
            Some(at) => now.duration_since(*at) >= self.ttl,
            None => true,
        };
        if fresh {
            seen.insert(fill_id.to_string(), now);
        }
        fresh
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

// ---------------------------------------------------------------------------
// FillProcessor
// ---------------------------------------------------------------------------

/// What happened to one delivered fill.
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    /// Applied; carries the realized delta booked by this fill.
    Applied { realized_delta: Decimal },
    /// Failed validation; logged and dropped.
    DroppedInvalid(String),
    /// Already processed (in-process filter or database key).
    DroppedDuplicate,
    /// Referenced an unknown/terminal order or breached an invariant;
    /// recorded in fill_anomalies for the operator.
    Anomaly(String),
}

#[derive(Debug, Clone)]
pub struct FillProcessorConfig {
    /// Exchange timezone for the daily-PnL date.
    pub timezone: Tz,
    pub allow_short: bool,
    /// Fallback when no risk_rules row matches the fill's account/symbol.
    pub default_rule: RiskRule,
}

pub struct FillProcessor {
    pool: PgPool,
    dedupe: DuplicateFilter,
    config: FillProcessorConfig,
}

impl FillProcessor {
    pub fn new(pool: PgPool, config: FillProcessorConfig) -> Self {
        Self {
            pool,
            dedupe: DuplicateFilter::default(),
            config,
        }
    }

    /// Process one delivered fill. Infrastructure faults are errors (the
    /// delivery may be retried); everything else is an outcome value.
    pub async fn process(&self, fill: Fill, now: DateTime<Utc>) -> Result<FillOutcome> {
        if let Err(reason) = validate_fill(&fill, now) {
            warn!(fill_id = %fill.fill_id, %reason, "invalid fill dropped");
            return Ok(FillOutcome::DroppedInvalid(reason));
        }

        if !self.dedupe.put_if_absent(&fill.fill_id) {
            return Ok(FillOutcome::DroppedDuplicate);
        }

        self.apply(fill, now).await
    }

    async fn apply(&self, fill: Fill, now: DateTime<Utc>) -> Result<FillOutcome> {
        let mut tx = self.pool.begin().await.context("begin fill tx")?;

        // Order first: its row lock serializes concurrent fills for the same
        // order, and the fills FK needs it to exist anyway.
        let Some(order) = sp_db::orders::fetch_for_update(&mut tx, &fill.order_id).await? else {
            drop(tx);
            return self
                .record_anomaly(&fill, format!("unknown order {}", fill.order_id))
                .await;
        };

        if !order.status.can_fill() {
            drop(tx);
            return self
                .record_anomaly(
                    &fill,
                    format!("order {} is {}", order.order_id, order.status.as_str()),
                )
                .await;
        }

        // Durable dedupe: the unique fill_id decides ownership across
        // restarts.
        if !sp_db::fills::insert_deduped(&mut tx, &fill).await? {
            return Ok(FillOutcome::DroppedDuplicate);
        }

        let cumulative = sp_db::fills::total_filled_qty(&mut tx, &fill.order_id).await?;
        if cumulative > order.qty {
            // Invariant violation: refuse the transaction, never
            // auto-correct.
            drop(tx);
            error!(
                fill_id = %fill.fill_id,
                order_id = %order.order_id,
                cumulative,
                order_qty = order.qty,
                "fill exceeds order quantity"
            );
            return self
                .record_anomaly(
                    &fill,
                    format!("cumulative {} exceeds order qty {}", cumulative, order.qty),
                )
                .await;
        }

        // Position under its row lock; concurrent fills for the same
        // (account, symbol) queue here.
        let position = sp_db::positions::fetch_for_update(&mut tx, &fill.account_id, &fill.symbol)
            .await?
            .unwrap_or_else(|| Position::flat(&fill.account_id, &fill.symbol, now));

        let update = match apply_fill_to_position(
            position.qty,
            position.avg_price,
            fill.side,
            fill.fill_qty,
            fill.fill_price,
            fill.commission,
            self.config.allow_short,
        ) {
            Ok(u) => u,
            Err(e) => {
                drop(tx);
                return self.record_anomaly(&fill, e.to_string()).await;
            }
        };

        let new_position = Position {
            account_id: fill.account_id.clone(),
            symbol: fill.symbol.clone(),
            qty: update.new_qty,
            avg_price: update.new_avg_price,
            last_updated_at: now,
        };
        sp_db::positions::upsert(&mut tx, &new_position).await?;
        sp_db::outbox::enqueue(
            &mut tx,
            &OutboxEvent::pending(
                EventType::PositionUpdated,
                event_payload(
                    &fill.account_id,
                    now,
                    json!({
                        "symbol": fill.symbol,
                        "qty": update.new_qty,
                        "avg_price": update.new_avg_price,
                    }),
                ),
                now,
            ),
        )
        .await?;

        // Ledger append (every fill gets a row, delta may be zero) and
        // daily-PnL accumulation.
        let realized = round_money(update.realized_delta);
        let prior =
            sp_db::positions::last_cumulative_realized(&mut tx, &fill.account_id, &fill.symbol)
                .await?;
        sp_db::positions::append_ledger(
            &mut tx,
            &fill.account_id,
            &fill.symbol,
            &fill.fill_id,
            realized,
            prior + realized,
        )
        .await?;
        sp_db::outbox::enqueue(
            &mut tx,
            &OutboxEvent::pending(
                EventType::PnlUpdated,
                event_payload(
                    &fill.account_id,
                    now,
                    json!({
                        "symbol": fill.symbol,
                        "realized_delta": realized,
                        "cumulative_realized": prior + realized,
                    }),
                ),
                now,
            ),
        )
        .await?;

        let today = self
            .config
            .timezone
            .from_utc_datetime(&now.naive_utc())
            .date_naive();
        let mut state =
            sp_db::risk::ensure_state_for_update(&mut tx, &fill.account_id, today).await?;
        state.roll_pnl_date(today);
        state.daily_pnl = round_money(state.daily_pnl + realized);

        let rule = sp_db::risk::resolve_rule(&mut tx, &fill.account_id, &fill.symbol)
            .await?
            .unwrap_or_else(|| self.config.default_rule.clone());
        if let Some(transition) = auto_trip(&mut state, &rule) {
            sp_db::outbox::enqueue(
                &mut tx,
                &OutboxEvent::pending(
                    EventType::KillSwitchTriggered,
                    event_payload(
                        &fill.account_id,
                        now,
                        json!({
                            "reason": transition.reason,
                            "from": transition.from.as_str(),
                            "daily_pnl": state.daily_pnl,
                        }),
                    ),
                    now,
                ),
            )
            .await?;
            error!(
                account_id = %fill.account_id,
                reason = %transition.reason,
                daily_pnl = %state.daily_pnl,
                "kill switch tripped by realized loss"
            );
        }
        state.updated_at = now;
        sp_db::risk::save_state(&mut tx, &state).await?;

        // Order progress: PART_FILLED until the quantities meet exactly.
        let new_status = if cumulative == order.qty {
            OrderStatus::Filled
        } else {
            OrderStatus::PartFilled
        };
        if !can_transition(order.status, new_status) {
            drop(tx);
            return self
                .record_anomaly(
                    &fill,
                    format!(
                        "illegal order transition {} -> {}",
                        order.status.as_str(),
                        new_status.as_str()
                    ),
                )
                .await;
        }
        sp_db::orders::record_fill_progress(&mut tx, &order.order_id, cumulative, new_status, now)
            .await?;

        sp_db::outbox::enqueue(
            &mut tx,
            &OutboxEvent::pending(
                EventType::FillApplied,
                event_payload(
                    &fill.fill_id,
                    now,
                    json!({
                        "order_id": fill.order_id,
                        "symbol": fill.symbol,
                        "side": fill.side.as_str(),
                        "fill_qty": fill.fill_qty,
                        "fill_price": fill.fill_price,
                        "order_status": new_status.as_str(),
                    }),
                ),
                now,
            ),
        )
        .await?;

        tx.commit().await.context("commit fill apply")?;
        info!(
            fill_id = %fill.fill_id,
            order_id = %fill.order_id,
            realized = %realized,
            status = new_status.as_str(),
            "fill applied"
        );
        Ok(FillOutcome::Applied {
            realized_delta: realized,
        })
    }

    /// Record an unappliable fill for operator investigation, in its own
    /// small transaction (the apply transaction was rolled back).
    async fn record_anomaly(&self, fill: &Fill, reason: String) -> Result<FillOutcome> {
        warn!(fill_id = %fill.fill_id, %reason, "fill anomaly recorded");
        let mut tx = self.pool.begin().await.context("begin anomaly tx")?;
        sp_db::fills::insert_anomaly(
            &mut tx,
            &fill.fill_id,
            Some(&fill.order_id),
            &reason,
            serde_json::to_value(fill).context("serialize fill for anomaly")?,
        )
        .await?;
        tx.commit().await.context("commit anomaly")?;
        Ok(FillOutcome::Anomaly(reason))
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_fill(fill: &Fill, now: DateTime<Utc>) -> Result<(), String> {
    if fill.fill_id.is_empty() || fill.order_id.is_empty() || fill.account_id.is_empty() {
        return Err("missing identifier".into());
    }
    if fill.symbol.is_empty() {
        return Err("missing symbol".into());
    }
    if !(MIN_FILL_QTY..=MAX_FILL_QTY).contains(&fill.fill_qty) {
        return Err(format!(
            "fill_qty {} outside [{MIN_FILL_QTY}, {MAX_FILL_QTY}]",
            fill.fill_qty
        ));
    }
    let price = fill.fill_price;
    if price < Decimal::from(MIN_FILL_PRICE) || price > Decimal::from(MAX_FILL_PRICE) {
        return Err(format!(
            "fill_price {price} outside [{MIN_FILL_PRICE}, {MAX_FILL_PRICE}]"
        ));
    }
    if fill.fill_ts > now {
        return Err("fill timestamp is in the future".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use sp_domain::Side;

    fn fill() -> Fill {
        Fill {
            fill_id: "F1".into(),
            order_id: "ord-1".into(),
            account_id: "acct-1".into(),
            symbol: "005930".into(),
            side: Side::Buy,
            fill_qty: 10,
            fill_price: dec!(70000),
            commission: None,
            fill_ts: Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 1).unwrap()
    }

    #[test]
    fn validation_bounds() {
        assert!(validate_fill(&fill(), now()).is_ok());

        let mut f = fill();
        f.fill_qty = 0;
        assert!(validate_fill(&f, now()).is_err());

        let mut f = fill();
        f.fill_qty = 1_000_001;
        assert!(validate_fill(&f, now()).is_err());

        let mut f = fill();
        f.fill_price = dec!(99.99);
        assert!(validate_fill(&f, now()).is_err());

        let mut f = fill();
        f.fill_price = dec!(10000001);
        assert!(validate_fill(&f, now()).is_err());

        let mut f = fill();
        f.fill_id = String::new();
        assert!(validate_fill(&f, now()).is_err());

        let mut f = fill();
        f.fill_ts = now() + chrono::Duration::seconds(1);
        assert!(validate_fill(&f, now()).is_err());
    }

    #[test]
    fn duplicate_filter_put_if_absent() {
        let filter = DuplicateFilter::default();
        assert!(filter.put_if_absent("F1"));
        assert!(!filter.put_if_absent("F1"));
        assert!(filter.put_if_absent("F2"));
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn duplicate_filter_evicts_when_saturated() {
        let filter = DuplicateFilter::new(4, Duration::from_secs(3600));
        for i in 0..4 {
            assert!(filter.put_if_absent(&format!("F{i}")));
        }
        // Saturated; the next insert forces an eviction sweep but still
        // admits the new id.
        assert!(filter.put_if_absent("F-new"));
        assert!(filter.len() <= 4);
    }
}
