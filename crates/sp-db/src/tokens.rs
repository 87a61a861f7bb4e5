//! Persisted fallback for broker access tokens. The in-memory cache in
//! `sp-broker` is primary; this row survives restarts so a still-valid token
//! is not re-issued unnecessarily.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct StoredToken {
    pub broker: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn upsert(pool: &PgPool, token: &StoredToken) -> Result<()> {
    sqlx::query(
        r#"
        insert into broker_tokens (broker, access_token, expires_at, updated_at)
        values ($1, $2, $3, now())
        on conflict (broker) do update
            set access_token = excluded.access_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
        "#,
    )
    .bind(&token.broker)
    .bind(&token.access_token)
    .bind(token.expires_at)
    .execute(pool)
    .await
    .context("broker_tokens upsert failed")?;
    Ok(())
}

pub async fn load(pool: &PgPool, broker: &str) -> Result<Option<StoredToken>> {
    let row = sqlx::query(
        r#"
        select broker, access_token, expires_at
        from broker_tokens
        where broker = $1
        "#,
    )
    .bind(broker)
    .fetch_optional(pool)
    .await
    .context("broker_tokens load failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(StoredToken {
        broker: row.try_get("broker")?,
        access_token: row.try_get("access_token")?,
        expires_at: row.try_get("expires_at")?,
    }))
}
