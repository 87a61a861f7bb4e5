//! Order repository.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};

use sp_domain::{Order, OrderStatus, OrderType, Side};

fn order_from_row(row: &PgRow) -> Result<Order> {
    let side: String = row.try_get("side")?;
    let order_type: String = row.try_get("order_type")?;
    let status: String = row.try_get("status")?;

    Ok(Order {
        order_id: row.try_get("order_id")?,
        account_id: row.try_get("account_id")?,
        strategy_id: row.try_get("strategy_id")?,
        strategy_version_id: row.try_get("strategy_version_id")?,
        symbol: row.try_get("symbol")?,
        side: Side::parse(&side).ok_or_else(|| anyhow!("invalid order side: {side}"))?,
        order_type: OrderType::parse(&order_type)
            .ok_or_else(|| anyhow!("invalid order type: {order_type}"))?,
        qty: row.try_get("qty")?,
        price: row.try_get::<Option<Decimal>, _>("price")?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| anyhow!("invalid order status: {status}"))?,
        reject_code: row.try_get("reject_code")?,
        reject_reason: row.try_get("reject_reason")?,
        idempotency_key: row.try_get("idempotency_key")?,
        broker_order_no: row.try_get("broker_order_no")?,
        filled_qty: row.try_get("filled_qty")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const ORDER_COLUMNS: &str = r#"
    order_id, account_id, strategy_id, strategy_version_id, symbol, side,
    order_type, qty, price, status, reject_code, reject_reason,
    idempotency_key, broker_order_no, filled_qty, created_at, updated_at
"#;

/// Insert a new order row exactly as given.
pub async fn insert(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query(
        r#"
        insert into orders (
          order_id, account_id, strategy_id, strategy_version_id, symbol,
          side, order_type, qty, price, status, reject_code, reject_reason,
          idempotency_key, broker_order_no, filled_qty, created_at, updated_at
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17
        )
        "#,
    )
    .bind(&order.order_id)
    .bind(&order.account_id)
    .bind(&order.strategy_id)
    .bind(&order.strategy_version_id)
    .bind(&order.symbol)
    .bind(order.side.as_str())
    .bind(order.order_type.as_str())
    .bind(order.qty)
    .bind(order.price)
    .bind(order.status.as_str())
    .bind(&order.reject_code)
    .bind(&order.reject_reason)
    .bind(&order.idempotency_key)
    .bind(&order.broker_order_no)
    .bind(order.filled_qty)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *conn)
    .await
    .context("orders insert failed")?;
    Ok(())
}

/// Idempotent-replay lookup. Returns the existing order for a key, if any.
pub async fn fetch_by_idempotency_key(
    conn: &mut PgConnection,
    idempotency_key: &str,
) -> Result<Option<Order>> {
    let row = sqlx::query(&format!(
        "select {ORDER_COLUMNS} from orders where idempotency_key = $1"
    ))
    .bind(idempotency_key)
    .fetch_optional(&mut *conn)
    .await
    .context("orders fetch_by_idempotency_key failed")?;

    row.as_ref().map(order_from_row).transpose()
}

pub async fn fetch(conn: &mut PgConnection, order_id: &str) -> Result<Option<Order>> {
    let row = sqlx::query(&format!("select {ORDER_COLUMNS} from orders where order_id = $1"))
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await
        .context("orders fetch failed")?;

    row.as_ref().map(order_from_row).transpose()
}

/// Fetch with a row lock; fill application serializes on this.
pub async fn fetch_for_update(conn: &mut PgConnection, order_id: &str) -> Result<Option<Order>> {
    let row = sqlx::query(&format!(
        "select {ORDER_COLUMNS} from orders where order_id = $1 for update"
    ))
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await
    .context("orders fetch_for_update failed")?;

    row.as_ref().map(order_from_row).transpose()
}

/// Orders counted against the max-open-orders limit.
pub async fn count_open_for_account(conn: &mut PgConnection, account_id: &str) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as(
        r#"
        select count(*)::bigint
        from orders
        where account_id = $1
          and status in ('NEW', 'SENT', 'ACCEPTED', 'PART_FILLED')
        "#,
    )
    .bind(account_id)
    .fetch_one(&mut *conn)
    .await
    .context("orders count_open_for_account failed")?;
    Ok(n)
}

/// Guarded status transition: updates only when the current status is one of
/// `from`. Returns false when the guard did not match (caller treats that as
/// a state-machine violation).
pub async fn transition(
    conn: &mut PgConnection,
    order_id: &str,
    from: &[OrderStatus],
    to: OrderStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
    let res = sqlx::query(
        r#"
        update orders
           set status = $3, updated_at = $4
         where order_id = $1
           and status = any($2)
        "#,
    )
    .bind(order_id)
    .bind(&from)
    .bind(to.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("orders transition failed")?;
    Ok(res.rows_affected() == 1)
}

/// NEW → SENT with the broker's order number.
pub async fn mark_sent(
    conn: &mut PgConnection,
    order_id: &str,
    broker_order_no: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update orders
           set status = 'SENT', broker_order_no = $2, updated_at = $3
         where order_id = $1
           and status = 'NEW'
        "#,
    )
    .bind(order_id)
    .bind(broker_order_no)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("orders mark_sent failed")?;
    Ok(res.rows_affected() == 1)
}

/// Any non-terminal state → REJECTED with a machine-readable code.
pub async fn mark_rejected(
    conn: &mut PgConnection,
    order_id: &str,
    code: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update orders
           set status = 'REJECTED', reject_code = $2, reject_reason = $3, updated_at = $4
         where order_id = $1
           and status not in ('FILLED', 'REJECTED', 'CANCELLED')
        "#,
    )
    .bind(order_id)
    .bind(code)
    .bind(reason)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("orders mark_rejected failed")?;
    Ok(res.rows_affected() == 1)
}

/// Record fill progress: denormalized filled_qty plus the PART_FILLED/FILLED
/// transition, in one statement.
pub async fn record_fill_progress(
    conn: &mut PgConnection,
    order_id: &str,
    filled_qty: i64,
    status: OrderStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        update orders
           set filled_qty = $2, status = $3, updated_at = $4
         where order_id = $1
        "#,
    )
    .bind(order_id)
    .bind(filled_qty)
    .bind(status.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("orders record_fill_progress failed")?;
    Ok(())
}

/// Apply a broker-acked modification.
pub async fn record_modification(
    conn: &mut PgConnection,
    order_id: &str,
    new_qty: Option<i64>,
    new_price: Option<Decimal>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        update orders
           set qty = coalesce($2, qty),
               price = coalesce($3, price),
               updated_at = $4
         where order_id = $1
        "#,
    )
    .bind(order_id)
    .bind(new_qty)
    .bind(new_price)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("orders record_modification failed")?;
    Ok(())
}
