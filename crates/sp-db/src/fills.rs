//! Fill repository. `fill_id` is the broker-assigned primary key and the
//! durable deduplication point: the in-process filter in `sp-execution` is a
//! fast path only, this insert decides ownership after a restart.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgConnection;

use sp_domain::Fill;

/// Insert with dedupe on fill_id.
///
/// Returns true if the row was inserted, false if the fill was already
/// recorded (duplicate delivery — caller drops it without side effects).
pub async fn insert_deduped(conn: &mut PgConnection, fill: &Fill) -> Result<bool> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        insert into fills (
          fill_id, order_id, account_id, symbol, side, fill_qty, fill_price,
          commission, fill_ts
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        on conflict (fill_id) do nothing
        returning fill_id
        "#,
    )
    .bind(&fill.fill_id)
    .bind(&fill.order_id)
    .bind(&fill.account_id)
    .bind(&fill.symbol)
    .bind(fill.side.as_str())
    .bind(fill.fill_qty)
    .bind(fill.fill_price)
    .bind(fill.commission)
    .bind(fill.fill_ts)
    .fetch_optional(&mut *conn)
    .await
    .context("fills insert_deduped failed")?;

    Ok(row.is_some())
}

/// Authoritative Σ fill_qty for an order.
pub async fn total_filled_qty(conn: &mut PgConnection, order_id: &str) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as(
        r#"
        select coalesce(sum(fill_qty), 0)::bigint
        from fills
        where order_id = $1
        "#,
    )
    .bind(order_id)
    .fetch_one(&mut *conn)
    .await
    .context("fills total_filled_qty failed")?;
    Ok(n)
}

/// Record a fill that could not be applied (unknown order, terminal order,
/// invariant breach). Kept for operator investigation instead of being
/// silently lost.
pub async fn insert_anomaly(
    conn: &mut PgConnection,
    fill_id: &str,
    order_id: Option<&str>,
    reason: &str,
    payload: Value,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into fill_anomalies (fill_id, order_id, reason, payload)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(fill_id)
    .bind(order_id)
    .bind(reason)
    .bind(payload)
    .execute(&mut *conn)
    .await
    .context("fill_anomalies insert failed")?;
    Ok(())
}
