//! Strategy scheduler.
//!
//! A minute-aligned timer fans each ACTIVE strategy out over its symbol
//! mappings into a semaphore-bounded worker pool. Tasks are isolated: one
//! evaluation failing (bad params, timeout, broker refusal) is logged and
//! counted, never aborts the batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Timelike, Utc};
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sp_domain::{new_id, OrderType, Side, Signal, SignalType, Strategy, Timeframe};
use sp_execution::{place_order, OrderDeps, PlaceOrderRequest};
use sp_marketdata::BarStore;
use sp_strategy::{PolicyVerdict, SignalPolicy, StrategyContext, StrategyRegistry};

// ---------------------------------------------------------------------------
// ScheduleSpec
// ---------------------------------------------------------------------------

/// Fixed-interval schedule aligned to a second-of-minute. The default —
/// every 60s at second 0 — fires on each minute boundary.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleSpec {
    pub every: Duration,
    pub at_second: u32,
}

impl Default for ScheduleSpec {
    fn default() -> Self {
        Self {
            every: Duration::from_secs(60),
            at_second: 0,
        }
    }
}

impl ScheduleSpec {
    /// Delay from `now` to the first aligned fire.
    pub fn delay_until_first_fire(&self, now: DateTime<Utc>) -> Duration {
        let current = now.second();
        let target = self.at_second.min(59);
        let secs = if current < target {
            (target - current) as u64
        } else {
            (60 - current + target) as u64
        };
        // Land on the exact second boundary.
        let sub_ms = now.timestamp_subsec_millis() as u64;
        Duration::from_secs(secs.max(1)) - Duration::from_millis(sub_ms.min(999))
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// What one (strategy, symbol, account) evaluation concluded.
#[derive(Debug)]
pub enum EvalOutcome {
    /// Signal accepted and order placed (any terminal placement state).
    Placed { order_id: String, status: String },
    /// The signal policy stopped the signal.
    PolicyRejected(&'static str),
    /// Evaluation failed: bad params, missing version, timeout.
    Error(String),
}

pub struct SchedulerDeps {
    pub pool: PgPool,
    pub registry: Arc<StrategyRegistry>,
    pub policy: Arc<SignalPolicy>,
    pub store: Arc<BarStore>,
    pub order_deps: Arc<OrderDeps>,
    pub enabled: Arc<AtomicBool>,
    pub task_timeout: Duration,
    pub max_concurrent: usize,
    /// Fallback (symbol, account) for strategies with no mappings; `None`
    /// skips them.
    pub default_symbol: Option<String>,
    pub default_account: Option<String>,
}

pub struct StrategyScheduler {
    deps: Arc<SchedulerDeps>,
}

impl StrategyScheduler {
    pub fn new(deps: Arc<SchedulerDeps>) -> Self {
        Self { deps }
    }

    /// Start the timer loop.
    pub fn spawn(self, spec: ScheduleSpec) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(spec.delay_until_first_fire(Utc::now())).await;
            let mut ticker = tokio::time::interval(spec.every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once(Utc::now()).await {
                    warn!(error = %e, "scheduler tick failed");
                }
            }
        })
    }

    /// One scheduler tick: fan out and wait for the batch.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<()> {
        if !self.deps.enabled.load(Ordering::SeqCst) {
            return Ok(());
        }

        let strategies = {
            let mut conn = self.deps.pool.acquire().await.context("acquire for scheduler")?;
            sp_db::strategies::list_active(&mut conn).await?
        };
        if strategies.is_empty() {
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.deps.max_concurrent));
        let mut tasks = Vec::new();

        for strategy in strategies {
            let mappings = {
                let mut conn = self.deps.pool.acquire().await.context("acquire for mappings")?;
                sp_db::strategies::list_active_symbols(&mut conn, &strategy.strategy_id).await?
            };

            let targets: Vec<(String, String)> = if mappings.is_empty() {
                match (&self.deps.default_symbol, &self.deps.default_account) {
                    (Some(symbol), Some(account)) => vec![(symbol.clone(), account.clone())],
                    _ => {
                        info!(strategy = %strategy.name, "no symbol mappings, skipping");
                        continue;
                    }
                }
            } else {
                mappings
                    .into_iter()
                    .map(|m| (m.symbol, m.account_id))
                    .collect()
            };

            for (symbol, account_id) in targets {
                let deps = Arc::clone(&self.deps);
                let strategy = strategy.clone();
                let permit_source = Arc::clone(&semaphore);
                let timeout = self.deps.task_timeout;

                tasks.push(tokio::spawn(async move {
                    let _permit = permit_source.acquire_owned().await;
                    let label = format!("{}/{}/{}", strategy.name, symbol, account_id);
                    let outcome = match tokio::time::timeout(
                        timeout,
                        evaluate_one(&deps, &strategy, &symbol, &account_id, now),
                    )
                    .await
                    {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(e)) => EvalOutcome::Error(e.to_string()),
                        Err(_) => EvalOutcome::Error(format!("evaluation timed out after {timeout:?}")),
                    };
                    match &outcome {
                        EvalOutcome::Placed { order_id, status } => {
                            info!(%label, %order_id, %status, "evaluation placed order")
                        }
                        EvalOutcome::PolicyRejected(reason) => {
                            info!(%label, reason, "signal stopped by policy")
                        }
                        EvalOutcome::Error(e) => warn!(%label, error = %e, "evaluation error"),
                    }
                    outcome
                }));
            }
        }

        for task in tasks {
            // Task panics are isolated here; the batch always completes.
            if let Err(e) = task.await {
                warn!(error = %e, "evaluation task panicked");
            }
        }
        Ok(())
    }

    /// Operator surface: evaluate one (strategy, symbol, account) now.
    pub async fn trigger(
        &self,
        strategy_id: &str,
        symbol: &str,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<EvalOutcome> {
        let strategy = {
            let mut conn = self.deps.pool.acquire().await.context("acquire for trigger")?;
            sp_db::strategies::fetch(&mut conn, strategy_id)
                .await?
                .context("unknown strategy")?
        };
        evaluate_one(&self.deps, &strategy, symbol, account_id, now).await
    }
}

/// Load bars, evaluate, gate through the signal policy, place.
async fn evaluate_one(
    deps: &SchedulerDeps,
    strategy: &Strategy,
    symbol: &str,
    account_id: &str,
    now: DateTime<Utc>,
) -> Result<EvalOutcome> {
    let Some(version_id) = strategy.active_version_id.as_deref() else {
        return Ok(EvalOutcome::Error(format!(
            "strategy {} has no active version",
            strategy.name
        )));
    };

    let version = {
        let mut conn = deps.pool.acquire().await.context("acquire for version")?;
        sp_db::strategies::fetch_version(&mut conn, version_id)
            .await?
            .context("active version row missing")?
    };

    let evaluator = match deps.registry.build(&version.params_json) {
        Ok(e) => e,
        Err(e) => return Ok(EvalOutcome::Error(e.to_string())),
    };

    let timeframe = version
        .params_json
        .get("timeframe")
        .and_then(|v| v.as_str())
        .and_then(Timeframe::parse)
        .unwrap_or(Timeframe::M1);

    let bars = deps
        .store
        .recent_bars(symbol, timeframe, evaluator.required_bars())
        .await?;
    let decision = evaluator.evaluate(&StrategyContext::new(bars));

    let signal = Signal {
        signal_id: new_id(),
        strategy_id: strategy.strategy_id.clone(),
        symbol: symbol.to_string(),
        signal_type: decision.signal_type,
        reason: decision.reason.clone(),
        generated_at: now,
        ttl_seconds: evaluator.ttl_seconds(),
    };

    match deps.policy.decide(&signal, evaluator.cooldown_seconds(), now) {
        PolicyVerdict::Reject(rejection) => {
            let reason = match rejection {
                sp_strategy::PolicyRejection::Hold => "hold",
                sp_strategy::PolicyRejection::Expired => "expired",
                sp_strategy::PolicyRejection::Duplicate => "duplicate",
                sp_strategy::PolicyRejection::Cooldown => "cooldown",
            };
            Ok(EvalOutcome::PolicyRejected(reason))
        }
        PolicyVerdict::Accept => {
            let side = match signal.signal_type {
                SignalType::Buy => Side::Buy,
                SignalType::Sell => Side::Sell,
                // HOLD never survives the policy.
                SignalType::Hold => return Ok(EvalOutcome::PolicyRejected("hold")),
            };

            let order = place_order(
                &deps.order_deps,
                PlaceOrderRequest {
                    account_id: account_id.to_string(),
                    symbol: symbol.to_string(),
                    side,
                    order_type: OrderType::Market,
                    qty: evaluator.order_qty(),
                    price: None,
                    strategy_id: Some(strategy.strategy_id.clone()),
                    strategy_version_id: Some(version.version_id.clone()),
                    nonce: signal.signal_id.clone(),
                    idempotency_key: None,
                },
                now,
            )
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

            Ok(EvalOutcome::Placed {
                order_id: order.order_id,
                status: order.status.as_str().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn first_fire_aligns_to_second_zero() {
        let spec = ScheduleSpec::default();
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 20).unwrap();
        assert_eq!(spec.delay_until_first_fire(now), Duration::from_secs(40));

        // Just before the boundary waits for the next one, not 0.
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 59).unwrap();
        assert_eq!(spec.delay_until_first_fire(now), Duration::from_secs(1));
    }

    #[test]
    fn alignment_to_nonzero_second() {
        let spec = ScheduleSpec {
            every: Duration::from_secs(60),
            at_second: 30,
        };
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 10).unwrap();
        assert_eq!(spec.delay_until_first_fire(now), Duration::from_secs(20));
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 45).unwrap();
        assert_eq!(spec.delay_until_first_fire(now), Duration::from_secs(45));
    }

    #[test]
    fn subsecond_offset_is_trimmed() {
        let spec = ScheduleSpec::default();
        let now = Utc
            .with_ymd_and_hms(2025, 3, 4, 10, 0, 20)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(250))
            .unwrap();
        assert_eq!(
            spec.delay_until_first_fire(now),
            Duration::from_millis(39_750)
        );
    }
}
