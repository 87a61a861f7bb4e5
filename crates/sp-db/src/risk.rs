//! Risk-rule and risk-state repository.
//!
//! Risk state is read-modify-write under the row lock taken by
//! [`ensure_state_for_update`]; the in-memory order-frequency view is only a
//! cache of `recent_order_ts`.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};

use sp_domain::{KillSwitchState, RiskRule, RiskScope, RiskState};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

fn rule_from_row(row: &PgRow) -> Result<RiskRule> {
    let scope: String = row.try_get("scope")?;
    Ok(RiskRule {
        rule_id: row.try_get("rule_id")?,
        scope: RiskScope::parse(&scope).ok_or_else(|| anyhow!("invalid risk scope: {scope}"))?,
        account_id: row.try_get("account_id")?,
        symbol: row.try_get("symbol")?,
        max_position_value_per_symbol: row.try_get("max_position_value_per_symbol")?,
        max_open_orders: row.try_get("max_open_orders")?,
        max_orders_per_minute: row.try_get("max_orders_per_minute")?,
        daily_loss_limit: row.try_get("daily_loss_limit")?,
        consecutive_order_failures_limit: row.try_get("consecutive_order_failures_limit")?,
        active: row.try_get("active")?,
    })
}

/// Fetch the active rules applicable to (account, symbol), most specific
/// first: PER_SYMBOL, then PER_ACCOUNT, then GLOBAL. The caller takes the
/// head as the winning rule.
pub async fn resolve_rule(
    conn: &mut PgConnection,
    account_id: &str,
    symbol: &str,
) -> Result<Option<RiskRule>> {
    let row = sqlx::query(
        r#"
        select rule_id, scope, account_id, symbol, max_position_value_per_symbol,
               max_open_orders, max_orders_per_minute, daily_loss_limit,
               consecutive_order_failures_limit, active
        from risk_rules
        where active = true
          and (
                (scope = 'PER_SYMBOL' and symbol = $2
                     and (account_id is null or account_id = $1))
             or (scope = 'PER_ACCOUNT' and account_id = $1)
             or (scope = 'GLOBAL')
          )
        order by case scope
                   when 'PER_SYMBOL' then 0
                   when 'PER_ACCOUNT' then 1
                   else 2
                 end
        limit 1
        "#,
    )
    .bind(account_id)
    .bind(symbol)
    .fetch_optional(&mut *conn)
    .await
    .context("risk_rules resolve failed")?;

    row.as_ref().map(rule_from_row).transpose()
}

/// Create or replace a rule row.
pub async fn upsert_rule(conn: &mut PgConnection, rule: &RiskRule, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        insert into risk_rules (
          rule_id, scope, account_id, symbol, max_position_value_per_symbol,
          max_open_orders, max_orders_per_minute, daily_loss_limit,
          consecutive_order_failures_limit, active, created_at, updated_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
        on conflict (rule_id) do update
            set scope = excluded.scope,
                account_id = excluded.account_id,
                symbol = excluded.symbol,
                max_position_value_per_symbol = excluded.max_position_value_per_symbol,
                max_open_orders = excluded.max_open_orders,
                max_orders_per_minute = excluded.max_orders_per_minute,
                daily_loss_limit = excluded.daily_loss_limit,
                consecutive_order_failures_limit = excluded.consecutive_order_failures_limit,
                active = excluded.active,
                updated_at = excluded.updated_at
        "#,
    )
    .bind(&rule.rule_id)
    .bind(rule.scope.as_str())
    .bind(&rule.account_id)
    .bind(&rule.symbol)
    .bind(rule.max_position_value_per_symbol)
    .bind(rule.max_open_orders)
    .bind(rule.max_orders_per_minute)
    .bind(rule.daily_loss_limit)
    .bind(rule.consecutive_order_failures_limit)
    .bind(rule.active)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("risk_rules upsert failed")?;
    Ok(())
}

/// True when any rule row exists; startup seeds the GLOBAL default otherwise.
pub async fn any_rule_exists(conn: &mut PgConnection) -> Result<bool> {
    let (n,): (i64,) = sqlx::query_as("select count(*)::bigint from risk_rules")
        .fetch_one(&mut *conn)
        .await
        .context("risk_rules count failed")?;
    Ok(n > 0)
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

fn state_from_row(row: &PgRow) -> Result<RiskState> {
    let ks: String = row.try_get("kill_switch")?;
    let ts_json: serde_json::Value = row.try_get("recent_order_ts")?;
    let recent: Vec<DateTime<Utc>> =
        serde_json::from_value(ts_json).context("recent_order_ts decode failed")?;

    Ok(RiskState {
        scope_key: row.try_get("scope_key")?,
        kill_switch: KillSwitchState::parse(&ks)
            .ok_or_else(|| anyhow!("invalid kill switch state: {ks}"))?,
        kill_switch_reason: row.try_get("kill_switch_reason")?,
        daily_pnl: row.try_get::<Decimal, _>("daily_pnl")?,
        pnl_date: row.try_get::<NaiveDate, _>("pnl_date")?,
        consecutive_failures: row.try_get("consecutive_failures")?,
        recent_order_timestamps: recent,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert-if-absent then lock and return the state row for a scope.
///
/// The two-step shape (idempotent insert, then `for update` select) means
/// concurrent first-touch of a scope cannot race into two rows.
pub async fn ensure_state_for_update(
    conn: &mut PgConnection,
    scope_key: &str,
    today: NaiveDate,
) -> Result<RiskState> {
    sqlx::query(
        r#"
        insert into risk_states (scope_key, pnl_date)
        values ($1, $2)
        on conflict (scope_key) do nothing
        "#,
    )
    .bind(scope_key)
    .bind(today)
    .execute(&mut *conn)
    .await
    .context("risk_states ensure insert failed")?;

    let row = sqlx::query(
        r#"
        select scope_key, kill_switch, kill_switch_reason, daily_pnl, pnl_date,
               consecutive_failures, recent_order_ts, updated_at
        from risk_states
        where scope_key = $1
        for update
        "#,
    )
    .bind(scope_key)
    .fetch_one(&mut *conn)
    .await
    .context("risk_states fetch_for_update failed")?;

    state_from_row(&row)
}

/// Unlocked read for status surfaces.
pub async fn fetch_state(conn: &mut PgConnection, scope_key: &str) -> Result<Option<RiskState>> {
    let row = sqlx::query(
        r#"
        select scope_key, kill_switch, kill_switch_reason, daily_pnl, pnl_date,
               consecutive_failures, recent_order_ts, updated_at
        from risk_states
        where scope_key = $1
        "#,
    )
    .bind(scope_key)
    .fetch_optional(&mut *conn)
    .await
    .context("risk_states fetch failed")?;

    row.as_ref().map(state_from_row).transpose()
}

/// Write back a mutated state under the lock taken by
/// [`ensure_state_for_update`].
pub async fn save_state(conn: &mut PgConnection, state: &RiskState) -> Result<()> {
    let ts_json = serde_json::to_value(&state.recent_order_timestamps)
        .context("recent_order_ts encode failed")?;

    sqlx::query(
        r#"
        update risk_states
           set kill_switch = $2,
               kill_switch_reason = $3,
               daily_pnl = $4,
               pnl_date = $5,
               consecutive_failures = $6,
               recent_order_ts = $7,
               updated_at = $8
         where scope_key = $1
        "#,
    )
    .bind(&state.scope_key)
    .bind(state.kill_switch.as_str())
    .bind(&state.kill_switch_reason)
    .bind(state.daily_pnl)
    .bind(state.pnl_date)
    .bind(state.consecutive_failures)
    .bind(ts_json)
    .bind(state.updated_at)
    .execute(&mut *conn)
    .await
    .context("risk_states save failed")?;
    Ok(())
}
