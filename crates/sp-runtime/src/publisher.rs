//! Outbox publisher.
//!
//! Single active instance. Polls pending rows oldest-first on a fixed
//! delay, hands each to every registered consumer, stamps `published_at` on
//! success. Delivery is at-least-once: a crash after delivery but before
//! the stamp re-delivers on the next cycle, and consumers are required to
//! be idempotent. Ten failed attempts poison the row and page the operator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use sp_domain::OutboxEvent;

/// Downstream delivery target (notification service, audit log, external
/// bus). Implementations must tolerate duplicate deliveries.
#[async_trait]
pub trait OutboxConsumer: Send + Sync {
    async fn deliver(&self, event: &OutboxEvent) -> Result<()>;
}

/// Default consumer: structured log line per event. Keeps the publisher
/// loop observable before real downstreams are attached.
pub struct LogConsumer;

#[async_trait]
impl OutboxConsumer for LogConsumer {
    async fn deliver(&self, event: &OutboxEvent) -> Result<()> {
        info!(
            event_id = %event.event_id,
            event_type = event.event_type.as_str(),
            payload = %event.payload_json,
            "outbox event"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleStats {
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
    pub poisoned: usize,
}

pub struct OutboxPublisher {
    pool: PgPool,
    consumers: Vec<Arc<dyn OutboxConsumer>>,
    fixed_delay: Duration,
    batch_size: i64,
    max_attempts: i32,
}

impl OutboxPublisher {
    pub fn new(pool: PgPool, consumers: Vec<Arc<dyn OutboxConsumer>>, fixed_delay: Duration) -> Self {
        Self {
            pool,
            consumers,
            fixed_delay,
            batch_size: 100,
            max_attempts: 10,
        }
    }

    /// Run the poll loop until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.fixed_delay);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_cycle().await {
                    Ok(stats) if stats.claimed > 0 => {
                        info!(
                            claimed = stats.claimed,
                            published = stats.published,
                            failed = stats.failed,
                            poisoned = stats.poisoned,
                            "outbox cycle"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "outbox cycle failed"),
                }
            }
        })
    }

    /// One poll cycle. Claiming pre-increments `attempts`, so a row that
    /// keeps failing converges on the poison threshold even if the process
    /// crashes mid-cycle.
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let events = sp_db::outbox::claim_pending(&self.pool, self.batch_size).await?;
        let mut stats = CycleStats {
            claimed: events.len(),
            ..CycleStats::default()
        };

        for event in &events {
            match self.deliver_to_all(event).await {
                Ok(()) => {
                    sp_db::outbox::mark_published(&self.pool, &event.event_id, Utc::now()).await?;
                    stats.published += 1;
                }
                Err(e) => {
                    if event.attempts >= self.max_attempts {
                        sp_db::outbox::mark_poisoned(&self.pool, &event.event_id).await?;
                        stats.poisoned += 1;
                        error!(
                            event_id = %event.event_id,
                            event_type = event.event_type.as_str(),
                            attempts = event.attempts,
                            error = %e,
                            "outbox event poisoned after max attempts; operator attention required"
                        );
                    } else {
                        stats.failed += 1;
                        warn!(
                            event_id = %event.event_id,
                            attempts = event.attempts,
                            error = %e,
                            "outbox delivery failed, will retry"
                        );
                    }
                }
            }
        }

        Ok(stats)
    }

    async fn deliver_to_all(&self, event: &OutboxEvent) -> Result<()> {
        for consumer in &self.consumers {
            consumer.deliver(event).await?;
        }
        Ok(())
    }
}
