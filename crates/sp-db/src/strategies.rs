//! Strategy administration repository: strategies, versioned parameters,
//! symbol mappings.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};

use sp_domain::{
    new_id, Strategy, StrategyStatus, StrategySymbol, StrategyVersion, TradeMode,
};

fn strategy_from_row(row: &PgRow) -> Result<Strategy> {
    let status: String = row.try_get("status")?;
    let mode: String = row.try_get("mode")?;
    Ok(Strategy {
        strategy_id: row.try_get("strategy_id")?,
        name: row.try_get("name")?,
        status: StrategyStatus::parse(&status)
            .ok_or_else(|| anyhow!("invalid strategy status: {status}"))?,
        mode: TradeMode::parse(&mode).ok_or_else(|| anyhow!("invalid trade mode: {mode}"))?,
        active_version_id: row.try_get("active_version_id")?,
        deleted: row.try_get("deleted")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const STRATEGY_COLUMNS: &str = r#"
    strategy_id, name, status, mode, active_version_id, deleted, created_at, updated_at
"#;

pub async fn insert(conn: &mut PgConnection, s: &Strategy) -> Result<()> {
    sqlx::query(
        r#"
        insert into strategies (
          strategy_id, name, status, mode, active_version_id, deleted, created_at, updated_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&s.strategy_id)
    .bind(&s.name)
    .bind(s.status.as_str())
    .bind(s.mode.as_str())
    .bind(&s.active_version_id)
    .bind(s.deleted)
    .bind(s.created_at)
    .bind(s.updated_at)
    .execute(&mut *conn)
    .await
    .context("strategies insert failed")?;
    Ok(())
}

pub async fn fetch(conn: &mut PgConnection, strategy_id: &str) -> Result<Option<Strategy>> {
    let row = sqlx::query(&format!(
        "select {STRATEGY_COLUMNS} from strategies where strategy_id = $1"
    ))
    .bind(strategy_id)
    .fetch_optional(&mut *conn)
    .await
    .context("strategies fetch failed")?;
    row.as_ref().map(strategy_from_row).transpose()
}

pub async fn fetch_by_name(conn: &mut PgConnection, name: &str) -> Result<Option<Strategy>> {
    let row = sqlx::query(&format!(
        "select {STRATEGY_COLUMNS} from strategies where name = $1"
    ))
    .bind(name)
    .fetch_optional(&mut *conn)
    .await
    .context("strategies fetch_by_name failed")?;
    row.as_ref().map(strategy_from_row).transpose()
}

/// Scheduler fan-out source: ACTIVE, not soft-deleted.
pub async fn list_active(conn: &mut PgConnection) -> Result<Vec<Strategy>> {
    let rows = sqlx::query(&format!(
        "select {STRATEGY_COLUMNS} from strategies where status = 'ACTIVE' and deleted = false order by strategy_id"
    ))
    .fetch_all(&mut *conn)
    .await
    .context("strategies list_active failed")?;

    rows.iter().map(strategy_from_row).collect()
}

/// ACTIVE ↔ INACTIVE flip. Returns false when already in the target state or
/// the strategy is deleted.
pub async fn set_status(
    conn: &mut PgConnection,
    strategy_id: &str,
    status: StrategyStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update strategies
           set status = $2, updated_at = $3
         where strategy_id = $1
           and status <> $2
           and deleted = false
        "#,
    )
    .bind(strategy_id)
    .bind(status.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("strategies set_status failed")?;
    Ok(res.rows_affected() == 1)
}

/// Soft delete; the row survives for audit joins.
pub async fn soft_delete(
    conn: &mut PgConnection,
    strategy_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update strategies
           set deleted = true, status = 'INACTIVE', updated_at = $2
         where strategy_id = $1
           and deleted = false
        "#,
    )
    .bind(strategy_id)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("strategies soft_delete failed")?;
    Ok(res.rows_affected() == 1)
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// Create the next parameter version and atomically swap the strategy's
/// active pointer to it. Must run inside a caller transaction.
pub async fn create_version_and_activate(
    conn: &mut PgConnection,
    strategy_id: &str,
    params_json: Value,
    now: DateTime<Utc>,
) -> Result<StrategyVersion> {
    let (next_no,): (i32,) = sqlx::query_as(
        r#"
        select coalesce(max(version_no), 0) + 1
        from strategy_versions
        where strategy_id = $1
        "#,
    )
    .bind(strategy_id)
    .fetch_one(&mut *conn)
    .await
    .context("strategy_versions next_no failed")?;

    let version = StrategyVersion {
        version_id: new_id(),
        strategy_id: strategy_id.to_string(),
        version_no: next_no,
        params_json,
        created_at: now,
    };

    sqlx::query(
        r#"
        insert into strategy_versions (version_id, strategy_id, version_no, params_json, created_at)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&version.version_id)
    .bind(&version.strategy_id)
    .bind(version.version_no)
    .bind(&version.params_json)
    .bind(version.created_at)
    .execute(&mut *conn)
    .await
    .context("strategy_versions insert failed")?;

    sqlx::query(
        r#"
        update strategies
           set active_version_id = $2, updated_at = $3
         where strategy_id = $1
        "#,
    )
    .bind(strategy_id)
    .bind(&version.version_id)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("strategies activate version failed")?;

    Ok(version)
}

pub async fn fetch_version(
    conn: &mut PgConnection,
    version_id: &str,
) -> Result<Option<StrategyVersion>> {
    let row = sqlx::query(
        r#"
        select version_id, strategy_id, version_no, params_json, created_at
        from strategy_versions
        where version_id = $1
        "#,
    )
    .bind(version_id)
    .fetch_optional(&mut *conn)
    .await
    .context("strategy_versions fetch failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(StrategyVersion {
        version_id: row.try_get("version_id")?,
        strategy_id: row.try_get("strategy_id")?,
        version_no: row.try_get("version_no")?,
        params_json: row.try_get("params_json")?,
        created_at: row.try_get("created_at")?,
    }))
}

// ---------------------------------------------------------------------------
// Symbol mappings
// ---------------------------------------------------------------------------

/// Active mappings driving scheduler fan-out.
pub async fn list_active_symbols(
    conn: &mut PgConnection,
    strategy_id: &str,
) -> Result<Vec<StrategySymbol>> {
    let rows = sqlx::query(
        r#"
        select strategy_id, symbol, account_id, is_active
        from strategy_symbols
        where strategy_id = $1 and is_active = true
        order by symbol, account_id
        "#,
    )
    .bind(strategy_id)
    .fetch_all(&mut *conn)
    .await
    .context("strategy_symbols list_active failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(StrategySymbol {
            strategy_id: row.try_get("strategy_id")?,
            symbol: row.try_get("symbol")?,
            account_id: row.try_get("account_id")?,
            is_active: row.try_get("is_active")?,
        });
    }
    Ok(out)
}

/// Add (or reactivate) a mapping. Idempotent on the triple.
pub async fn upsert_symbol(conn: &mut PgConnection, mapping: &StrategySymbol) -> Result<()> {
    sqlx::query(
        r#"
        insert into strategy_symbols (strategy_id, symbol, account_id, is_active)
        values ($1, $2, $3, $4)
        on conflict (strategy_id, symbol, account_id) do update
            set is_active = excluded.is_active
        "#,
    )
    .bind(&mapping.strategy_id)
    .bind(&mapping.symbol)
    .bind(&mapping.account_id)
    .bind(mapping.is_active)
    .execute(&mut *conn)
    .await
    .context("strategy_symbols upsert failed")?;
    Ok(())
}

pub async fn remove_symbol(
    conn: &mut PgConnection,
    strategy_id: &str,
    symbol: &str,
    account_id: &str,
) -> Result<bool> {
    let res = sqlx::query(
        r#"
        delete from strategy_symbols
        where strategy_id = $1 and symbol = $2 and account_id = $3
        "#,
    )
    .bind(strategy_id)
    .bind(symbol)
    .bind(account_id)
    .execute(&mut *conn)
    .await
    .context("strategy_symbols remove failed")?;
    Ok(res.rows_affected() == 1)
}
