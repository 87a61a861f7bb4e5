//! Durable bar storage. The unique (symbol, timeframe, bar_ts) index makes
//! sealing idempotent and guards sealed bars against late mutation.

use anyhow::{anyhow, Context, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use sp_domain::{Bar, Timeframe};

fn bar_from_row(row: &PgRow) -> Result<Bar> {
    let timeframe: String = row.try_get("timeframe")?;
    Ok(Bar {
        bar_id: row.try_get("bar_id")?,
        symbol: row.try_get("symbol")?,
        timeframe: Timeframe::parse(&timeframe)
            .ok_or_else(|| anyhow!("invalid timeframe: {timeframe}"))?,
        bar_ts: row.try_get("bar_ts")?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: row.try_get("volume")?,
        closed: row.try_get("closed")?,
    })
}

/// Write a bar. The conflict arm only touches still-open rows, so once a
/// bucket is sealed in the database a replayed seal (or a late tick that
/// somehow reached persistence) is a no-op.
pub async fn upsert(pool: &PgPool, bar: &Bar) -> Result<()> {
    sqlx::query(
        r#"
        insert into bars (
          bar_id, symbol, timeframe, bar_ts, open, high, low, close, volume, closed
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        on conflict (symbol, timeframe, bar_ts) do update
            set high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume,
                closed = excluded.closed
            where bars.closed = false
        "#,
    )
    .bind(&bar.bar_id)
    .bind(&bar.symbol)
    .bind(bar.timeframe.as_str())
    .bind(bar.bar_ts)
    .bind(bar.open)
    .bind(bar.high)
    .bind(bar.low)
    .bind(bar.close)
    .bind(bar.volume)
    .bind(bar.closed)
    .execute(pool)
    .await
    .context("bars upsert failed")?;
    Ok(())
}

/// Most recent `n` bars in chronological order.
pub async fn recent(
    pool: &PgPool,
    symbol: &str,
    timeframe: Timeframe,
    n: i64,
) -> Result<Vec<Bar>> {
    let rows = sqlx::query(
        r#"
        select bar_id, symbol, timeframe, bar_ts, open, high, low, close, volume, closed
        from bars
        where symbol = $1 and timeframe = $2
        order by bar_ts desc
        limit $3
        "#,
    )
    .bind(symbol)
    .bind(timeframe.as_str())
    .bind(n)
    .fetch_all(pool)
    .await
    .context("bars recent failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows.iter().rev() {
        out.push(bar_from_row(row)?);
    }
    Ok(out)
}
