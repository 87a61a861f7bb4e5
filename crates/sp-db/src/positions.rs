//! Position + PnL-ledger repository.
//!
//! Per-(account, symbol) mutations are serialized by the transaction plus
//! the `for update` lock taken here; concurrent fills for the same key queue
//! behind each other.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};

use sp_domain::{PnlLedgerEntry, Position};

fn position_from_row(row: &PgRow) -> Result<Position> {
    Ok(Position {
        account_id: row.try_get("account_id")?,
        symbol: row.try_get("symbol")?,
        qty: row.try_get("qty")?,
        avg_price: row.try_get::<Option<Decimal>, _>("avg_price")?,
        last_updated_at: row.try_get("last_updated_at")?,
    })
}

/// Lock and fetch the position row, if one exists.
pub async fn fetch_for_update(
    conn: &mut PgConnection,
    account_id: &str,
    symbol: &str,
) -> Result<Option<Position>> {
    let row = sqlx::query(
        r#"
        select account_id, symbol, qty, avg_price, last_updated_at
        from positions
        where account_id = $1 and symbol = $2
        for update
        "#,
    )
    .bind(account_id)
    .bind(symbol)
    .fetch_optional(&mut *conn)
    .await
    .context("positions fetch_for_update failed")?;

    row.as_ref().map(position_from_row).transpose()
}

/// Unlocked read, used by risk-exposure materialization.
pub async fn fetch(
    conn: &mut PgConnection,
    account_id: &str,
    symbol: &str,
) -> Result<Option<Position>> {
    let row = sqlx::query(
        r#"
        select account_id, symbol, qty, avg_price, last_updated_at
        from positions
        where account_id = $1 and symbol = $2
        "#,
    )
    .bind(account_id)
    .bind(symbol)
    .fetch_optional(&mut *conn)
    .await
    .context("positions fetch failed")?;

    row.as_ref().map(position_from_row).transpose()
}

pub async fn upsert(conn: &mut PgConnection, pos: &Position) -> Result<()> {
    sqlx::query(
        r#"
        insert into positions (account_id, symbol, qty, avg_price, last_updated_at)
        values ($1, $2, $3, $4, $5)
        on conflict (account_id, symbol) do update
            set qty = excluded.qty,
                avg_price = excluded.avg_price,
                last_updated_at = excluded.last_updated_at
        "#,
    )
    .bind(&pos.account_id)
    .bind(&pos.symbol)
    .bind(pos.qty)
    .bind(pos.avg_price)
    .bind(pos.last_updated_at)
    .execute(&mut *conn)
    .await
    .context("positions upsert failed")?;
    Ok(())
}

/// Last cumulative realized PnL for (account, symbol); zero when the ledger
/// is empty.
pub async fn last_cumulative_realized(
    conn: &mut PgConnection,
    account_id: &str,
    symbol: &str,
) -> Result<Decimal> {
    let row: Option<(Decimal,)> = sqlx::query_as(
        r#"
        select cumulative_realized
        from pnl_ledger
        where account_id = $1 and symbol = $2
        order by entry_id desc
        limit 1
        "#,
    )
    .bind(account_id)
    .bind(symbol)
    .fetch_optional(&mut *conn)
    .await
    .context("pnl_ledger last_cumulative_realized failed")?;

    Ok(row.map(|(c,)| c).unwrap_or(Decimal::ZERO))
}

/// Append one ledger row; returns the assigned entry_id.
pub async fn append_ledger(
    conn: &mut PgConnection,
    account_id: &str,
    symbol: &str,
    fill_id: &str,
    realized_delta: Decimal,
    cumulative_realized: Decimal,
) -> Result<i64> {
    let (entry_id,): (i64,) = sqlx::query_as(
        r#"
        insert into pnl_ledger (account_id, symbol, fill_id, realized_delta, cumulative_realized)
        values ($1, $2, $3, $4, $5)
        returning entry_id
        "#,
    )
    .bind(account_id)
    .bind(symbol)
    .bind(fill_id)
    .bind(realized_delta)
    .bind(cumulative_realized)
    .fetch_one(&mut *conn)
    .await
    .context("pnl_ledger append failed")?;
    Ok(entry_id)
}

/// Ledger rows for an order's account/symbol scope, oldest first. Test and
/// operator-query helper.
pub async fn ledger_for_scope(
    conn: &mut PgConnection,
    account_id: &str,
    symbol: &str,
) -> Result<Vec<PnlLedgerEntry>> {
    let rows = sqlx::query(
        r#"
        select entry_id, account_id, symbol, fill_id, realized_delta,
               cumulative_realized, created_at
        from pnl_ledger
        where account_id = $1 and symbol = $2
        order by entry_id asc
        "#,
    )
    .bind(account_id)
    .bind(symbol)
    .fetch_all(&mut *conn)
    .await
    .context("pnl_ledger ledger_for_scope failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(PnlLedgerEntry {
            entry_id: row.try_get("entry_id")?,
            account_id: row.try_get("account_id")?,
            symbol: row.try_get("symbol")?,
            fill_id: row.try_get("fill_id")?,
            realized_delta: row.try_get("realized_delta")?,
            cumulative_realized: row.try_get("cumulative_realized")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(out)
}
