//! Transactional outbox rows.
//!
//! Producers call [`enqueue`] inside the same transaction as the state
//! change. The publisher claims batches with `for update skip locked` so an
//! accidental second publisher instance cannot double-claim a row within a
//! poll cycle; delivery remains at-least-once and consumers must be
//! idempotent.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use sp_domain::{EventType, OutboxEvent};

fn event_from_row(row: &PgRow) -> Result<OutboxEvent> {
    let event_type: String = row.try_get("event_type")?;
    Ok(OutboxEvent {
        event_id: row.try_get("event_id")?,
        event_type: EventType::parse(&event_type)
            .ok_or_else(|| anyhow!("invalid event type: {event_type}"))?,
        payload_json: row.try_get("payload_json")?,
        created_at: row.try_get("created_at")?,
        published_at: row.try_get("published_at")?,
        attempts: row.try_get("attempts")?,
        poisoned: row.try_get("poisoned")?,
    })
}

/// Insert a pending event row. Same transaction as the state change it
/// records — that is the whole point of the outbox.
pub async fn enqueue(conn: &mut PgConnection, event: &OutboxEvent) -> Result<()> {
    sqlx::query(
        r#"
        insert into outbox_events (
          event_id, event_type, payload_json, created_at, published_at, attempts, poisoned
        ) values ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&event.event_id)
    .bind(event.event_type.as_str())
    .bind(&event.payload_json)
    .bind(event.created_at)
    .bind(event.published_at)
    .bind(event.attempts)
    .bind(event.poisoned)
    .execute(&mut *conn)
    .await
    .context("outbox enqueue failed")?;
    Ok(())
}

/// Claim up to `batch` pending rows in created_at order, pre-incrementing
/// `attempts` (attempt-in-progress semantics). Skip-locked keeps concurrent
/// claimants from overlapping.
pub async fn claim_pending(pool: &PgPool, batch: i64) -> Result<Vec<OutboxEvent>> {
    let rows = sqlx::query(
        r#"
        with to_claim as (
            select event_id
            from outbox_events
            where published_at is null
              and poisoned = false
            order by created_at asc
            limit $1
            for update skip locked
        )
        update outbox_events
           set attempts = attempts + 1
         where event_id in (select event_id from to_claim)
        returning event_id, event_type, payload_json, created_at, published_at,
                  attempts, poisoned
        "#,
    )
    .bind(batch)
    .fetch_all(pool)
    .await
    .context("outbox claim_pending failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(event_from_row(row)?);
    }
    // The CTE does not guarantee output order; the publisher delivers oldest
    // first.
    out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(out)
}

/// Stamp a delivered row. Only pending rows transition, so replays are safe.
pub async fn mark_published(pool: &PgPool, event_id: &str, now: DateTime<Utc>) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update outbox_events
           set published_at = $2
         where event_id = $1
           and published_at is null
        "#,
    )
    .bind(event_id)
    .bind(now)
    .execute(pool)
    .await
    .context("outbox mark_published failed")?;
    Ok(res.rows_affected() == 1)
}

/// Dead-letter a row after exhausting delivery attempts.
pub async fn mark_poisoned(pool: &PgPool, event_id: &str) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update outbox_events
           set poisoned = true
         where event_id = $1
           and published_at is null
        "#,
    )
    .bind(event_id)
    .execute(pool)
    .await
    .context("outbox mark_poisoned failed")?;
    Ok(res.rows_affected() == 1)
}

/// Pending backlog size (status surface).
pub async fn pending_count(pool: &PgPool) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as(
        r#"
        select count(*)::bigint
        from outbox_events
        where published_at is null and poisoned = false
        "#,
    )
    .fetch_one(pool)
    .await
    .context("outbox pending_count failed")?;
    Ok(n)
}

/// Events for one entity id, oldest first. Test helper for asserting the
/// same-transaction contract.
pub async fn events_for_entity(pool: &PgPool, entity_id: &str) -> Result<Vec<OutboxEvent>> {
    let rows = sqlx::query(
        r#"
        select event_id, event_type, payload_json, created_at, published_at,
               attempts, poisoned
        from outbox_events
        where payload_json->>'entity_id' = $1
        order by created_at asc
        "#,
    )
    .bind(entity_id)
    .fetch_all(pool)
    .await
    .context("outbox events_for_entity failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        out.push(event_from_row(row)?);
    }
    Ok(out)
}
