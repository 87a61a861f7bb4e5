//! Composition root and operator surface.
//!
//! `App::start` is the only place components are constructed and wired:
//! adapter variant selection, market-data pipeline, fill pipeline,
//! scheduler, outbox publisher. Everything is explicit — no global state,
//! no registries outside this function. Dropping the `App` (or calling
//! [`App::shutdown`]) aborts the background tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sp_broker::{BrokerAdapter, LiveBroker, LiveBrokerConfig, PaperBroker, StubBroker, SubscriptionId, TokenCredentials, TokenManager};
use sp_config::{AppConfig, MarketDataMode};
use sp_domain::{
    new_id, EventType, KillSwitchState, Order, OutboxEvent, RiskRule, RiskScope, Strategy,
    StrategyStatus, StrategySymbol, StrategyVersion, Timeframe, TradeMode,
};
use sp_execution::{
    cancel_order, event_payload, modify_order, place_order, FillProcessor, FillProcessorConfig,
    OrderDeps, PlaceOrderRequest, UseCaseError,
};
use sp_hours::{MarketCalendar, Session};
use sp_marketdata::{validate_tick, BarAggregator, BarStore, MarketDataCache};
use sp_risk::manual_set;
use sp_strategy::{SignalPolicy, StrategyRegistry};

use crate::publisher::{LogConsumer, OutboxConsumer, OutboxPublisher};
use crate::scheduler::{EvalOutcome, ScheduleSpec, SchedulerDeps, StrategyScheduler};

pub struct App {
    pool: PgPool,
    config: AppConfig,
    broker: Arc<dyn BrokerAdapter>,
    cache: Arc<MarketDataCache>,
    order_deps: Arc<OrderDeps>,
    sched_deps: Arc<SchedulerDeps>,
    scheduler_enabled: Arc<AtomicBool>,
    registry: Arc<StrategyRegistry>,
    timezone: Tz,
    /// Intake for all tick subscriptions; the pipeline task drains it.
    tick_tx: mpsc::UnboundedSender<sp_domain::Tick>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl App {
    /// Wire and start the whole runtime.
    pub async fn start(config: AppConfig, pool: PgPool) -> Result<Arc<Self>> {
        let timezone: Tz = config
            .market
            .timezone
            .parse()
            .map_err(|e| anyhow!("invalid market.timezone: {e}"))?;

        let calendar = build_calendar(&config, timezone)?;
        let default_rule = global_rule_from_config(&config);
        seed_global_rule(&pool, &default_rule).await?;

        let cache = Arc::new(MarketDataCache::new());
        let aggregator = Arc::new(BarAggregator::new([
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::D1,
        ]));
        let store = Arc::new(BarStore::new(pool.clone()));
        let registry = Arc::new(StrategyRegistry::with_builtins());
        let policy = Arc::new(SignalPolicy::new());

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        let broker = build_broker(&config, &pool, &cache, &mut tasks)?;

        let price_cache = Arc::clone(&cache);
        let order_deps = Arc::new(OrderDeps {
            pool: pool.clone(),
            broker: Arc::clone(&broker),
            calendar,
            price_lookup: Arc::new(move |symbol: &str| price_cache.latest_price(symbol)),
            default_rule: default_rule.clone(),
        });

        let fill_processor = Arc::new(FillProcessor::new(
            pool.clone(),
            FillProcessorConfig {
                timezone,
                allow_short: config.risk.allow_short,
                default_rule: default_rule.clone(),
            },
        ));

        let scheduler_enabled = Arc::new(AtomicBool::new(
            config.scheduler.strategy_execution_enabled,
        ));
        let sched_deps = Arc::new(SchedulerDeps {
            pool: pool.clone(),
            registry: Arc::clone(&registry),
            policy,
            store: Arc::clone(&store),
            order_deps: Arc::clone(&order_deps),
            enabled: Arc::clone(&scheduler_enabled),
            task_timeout: Duration::from_secs(config.scheduler.task_timeout_secs),
            max_concurrent: config.scheduler.max_concurrent_evaluations,
            default_symbol: config.scheduler.default_symbol.clone(),
            default_account: config.scheduler.default_account.clone(),
        });

        let (tick_tx, tick_rx) = mpsc::unbounded_channel::<sp_domain::Tick>();

        let app = Arc::new(Self {
            pool: pool.clone(),
            config,
            broker,
            cache,
            order_deps,
            sched_deps: Arc::clone(&sched_deps),
            scheduler_enabled,
            registry,
            timezone,
            tick_tx,
            tasks: Mutex::new(tasks),
            subscriptions: Mutex::new(Vec::new()),
        });

        app.spawn_market_pipeline(Arc::clone(&aggregator), Arc::clone(&store), tick_rx)
            .await?;
        app.spawn_fill_pipeline(fill_processor).await?;

        // Scheduler timer.
        let spec = ScheduleSpec {
            every: Duration::from_secs(app.config.scheduler.strategy_execution_every_secs.max(1)),
            at_second: app.config.scheduler.strategy_execution_at_second,
        };
        app.tasks
            .lock()
            .push(StrategyScheduler::new(sched_deps).spawn(spec));

        // Outbox publisher.
        let publisher = OutboxPublisher::new(
            pool,
            vec![Arc::new(LogConsumer) as Arc<dyn OutboxConsumer>],
            Duration::from_millis(app.config.scheduler.outbox_publisher_fixed_delay_ms.max(50)),
        );
        app.tasks.lock().push(publisher.spawn());

        info!("runtime started");
        Ok(app)
    }

    /// Tick intake: adapter callback → channel → validate → cache → fold →
    /// persist sealed bars. A sweep timer seals bars for quiet symbols.
    async fn spawn_market_pipeline(
        &self,
        aggregator: Arc<BarAggregator>,
        store: Arc<BarStore>,
        mut tick_rx: mpsc::UnboundedReceiver<sp_domain::Tick>,
    ) -> Result<()> {
        let agg = Arc::clone(&aggregator);
        let st = Arc::clone(&store);
        let cache = Arc::clone(&self.cache);
        self.tasks.lock().push(tokio::spawn(async move {
            while let Some(tick) = tick_rx.recv().await {
                if let Err(e) = validate_tick(&tick, Utc::now()) {
                    warn!(symbol = %tick.symbol, error = %e, "tick dropped");
                    continue;
                }
                cache.update(tick.clone());
                for sealed in agg.on_tick(&tick) {
                    if let Err(e) = st.persist(&sealed).await {
                        warn!(error = %e, "sealed bar persist failed");
                    }
                }
            }
        }));

        let agg = aggregator;
        let st = store;
        self.tasks.lock().push(tokio::spawn(async move {
            let mut sweep = tokio::time::interval(Duration::from_secs(1));
            loop {
                sweep.tick().await;
                for sealed in agg.seal_elapsed(Utc::now()) {
                    if let Err(e) = st.persist(&sealed).await {
                        warn!(error = %e, "swept bar persist failed");
                    }
                }
            }
        }));

        if !self.config.market_data.symbols.is_empty() {
            let tick_tx = self.tick_tx.clone();
            let handler: sp_broker::TickHandler = Arc::new(move |tick| {
                let _ = tick_tx.send(tick);
            });
            let sub = self
                .broker
                .subscribe_ticks(&self.config.market_data.symbols, handler)
                .await
                .map_err(|e| anyhow!("tick subscription failed: {e}"))?;
            self.subscriptions.lock().push(sub);
        }
        Ok(())
    }

    /// Fill intake: adapter callback → channel → fill processor.
    async fn spawn_fill_pipeline(&self, processor: Arc<FillProcessor>) -> Result<()> {
        let (fill_tx, mut fill_rx) = mpsc::unbounded_channel::<sp_domain::Fill>();

        self.tasks.lock().push(tokio::spawn(async move {
            while let Some(fill) = fill_rx.recv().await {
                match processor.process(fill, Utc::now()).await {
                    Ok(outcome) => {
                        tracing::debug!(?outcome, "fill processed");
                    }
                    Err(e) => warn!(error = %e, "fill processing failed"),
                }
            }
        }));

        if let Some(account) = self.config.scheduler.default_account.clone() {
            let handler: sp_broker::FillHandler = Arc::new(move |fill| {
                let _ = fill_tx.send(fill);
            });
            let sub = self
                .broker
                .subscribe_fills(&account, handler)
                .await
                .map_err(|e| anyhow!("fill subscription failed: {e}"))?;
            self.subscriptions.lock().push(sub);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Operator surface: orders
    // -----------------------------------------------------------------------

    pub async fn place_order(&self, req: PlaceOrderRequest) -> Result<Order, UseCaseError> {
        place_order(&self.order_deps, req, Utc::now()).await
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<Order, UseCaseError> {
        cancel_order(&self.order_deps, order_id, Utc::now()).await
    }

    pub async fn modify_order(
        &self,
        order_id: &str,
        new_qty: Option<i64>,
        new_price: Option<Decimal>,
    ) -> Result<Order, UseCaseError> {
        modify_order(&self.order_deps, order_id, new_qty, new_price, Utc::now()).await
    }

    // -----------------------------------------------------------------------
    // Operator surface: risk
    // -----------------------------------------------------------------------

    /// Flip the kill switch for a scope (`GLOBAL` or an account id). The
    /// transition and its event commit together.
    pub async fn toggle_kill_switch(
        &self,
        scope_key: &str,
        to: KillSwitchState,
        reason: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let today = now.with_timezone(&self.timezone).date_naive();
        let mut tx = self.pool.begin().await.context("begin kill-switch tx")?;

        let mut state = sp_db::risk::ensure_state_for_update(&mut tx, scope_key, today).await?;
        let transition = manual_set(&mut state, to, reason).map_err(|e| anyhow!(e))?;

        let Some(transition) = transition else {
            return Ok(()); // already in the requested state
        };

        state.updated_at = now;
        sp_db::risk::save_state(&mut tx, &state).await?;

        let event_type = match to {
            KillSwitchState::Off => EventType::KillSwitchReleased,
            _ => EventType::KillSwitchTriggered,
        };
        sp_db::outbox::enqueue(
            &mut tx,
            &OutboxEvent::pending(
                event_type,
                event_payload(
                    scope_key,
                    now,
                    json!({
                        "from": transition.from.as_str(),
                        "to": transition.to.as_str(),
                        "reason": reason,
                    }),
                ),
                now,
            ),
        )
        .await?;
        tx.commit().await.context("commit kill-switch toggle")?;
        info!(scope_key, to = to.as_str(), reason, "kill switch toggled");
        Ok(())
    }

    pub async fn set_risk_rule(&self, rule: RiskRule) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin rule tx")?;
        sp_db::risk::upsert_rule(&mut tx, &rule, Utc::now()).await?;
        tx.commit().await.context("commit rule upsert")?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Operator surface: strategies
    // -----------------------------------------------------------------------

    /// Create a strategy with its first parameter version (INACTIVE until
    /// explicitly activated). Params are validated against the registry
    /// before anything is written.
    pub async fn create_strategy(
        &self,
        name: &str,
        mode: TradeMode,
        params_json: serde_json::Value,
    ) -> Result<Strategy> {
        self.registry
            .build(&params_json)
            .map_err(|e| anyhow!("invalid strategy params: {e}"))?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await.context("begin create-strategy tx")?;

        if sp_db::strategies::fetch_by_name(&mut tx, name).await?.is_some() {
            return Err(anyhow!("strategy name already exists: {name}"));
        }

        let strategy = Strategy {
            strategy_id: new_id(),
            name: name.to_string(),
            status: StrategyStatus::Inactive,
            mode,
            active_version_id: None,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        sp_db::strategies::insert(&mut tx, &strategy).await?;
        let version = sp_db::strategies::create_version_and_activate(
            &mut tx,
            &strategy.strategy_id,
            params_json,
            now,
        )
        .await?;
        tx.commit().await.context("commit create-strategy")?;

        info!(strategy = name, version = version.version_no, "strategy created");
        Ok(Strategy {
            active_version_id: Some(version.version_id),
            ..strategy
        })
    }

    /// New parameter set ⇒ new version, atomically becoming active.
    pub async fn update_strategy_params(
        &self,
        strategy_id: &str,
        params_json: serde_json::Value,
    ) -> Result<StrategyVersion> {
        self.registry
            .build(&params_json)
            .map_err(|e| anyhow!("invalid strategy params: {e}"))?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await.context("begin update-params tx")?;
        sp_db::strategies::fetch(&mut tx, strategy_id)
            .await?
            .context("unknown strategy")?;
        let version =
            sp_db::strategies::create_version_and_activate(&mut tx, strategy_id, params_json, now)
                .await?;
        tx.commit().await.context("commit update-params")?;
        Ok(version)
    }

    /// ACTIVE/INACTIVE flip with the matching lifecycle event.
    pub async fn set_strategy_status(
        &self,
        strategy_id: &str,
        status: StrategyStatus,
    ) -> Result<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.context("begin status tx")?;
        let changed = sp_db::strategies::set_status(&mut tx, strategy_id, status, now).await?;
        if changed {
            let event_type = match status {
                StrategyStatus::Active => EventType::StrategyActivated,
                StrategyStatus::Inactive => EventType::StrategyDeactivated,
            };
            sp_db::outbox::enqueue(
                &mut tx,
                &OutboxEvent::pending(
                    event_type,
                    event_payload(strategy_id, now, json!({"status": status.as_str()})),
                    now,
                ),
            )
            .await?;
        }
        tx.commit().await.context("commit status flip")?;
        Ok(changed)
    }

    pub async fn delete_strategy(&self, strategy_id: &str) -> Result<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.context("begin delete tx")?;
        let deleted = sp_db::strategies::soft_delete(&mut tx, strategy_id, now).await?;
        if deleted {
            sp_db::outbox::enqueue(
                &mut tx,
                &OutboxEvent::pending(
                    EventType::StrategyDeactivated,
                    event_payload(strategy_id, now, json!({"deleted": true})),
                    now,
                ),
            )
            .await?;
        }
        tx.commit().await.context("commit delete")?;
        Ok(deleted)
    }

    pub async fn add_strategy_symbol(&self, mapping: StrategySymbol) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin mapping tx")?;
        sp_db::strategies::upsert_symbol(&mut tx, &mapping).await?;
        tx.commit().await.context("commit mapping")?;
        Ok(())
    }

    pub async fn remove_strategy_symbol(
        &self,
        strategy_id: &str,
        symbol: &str,
        account_id: &str,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("begin unmapping tx")?;
        let removed =
            sp_db::strategies::remove_symbol(&mut tx, strategy_id, symbol, account_id).await?;
        tx.commit().await.context("commit unmapping")?;
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Operator surface: scheduler and market data
    // -----------------------------------------------------------------------

    pub fn enable_scheduler(&self) {
        self.scheduler_enabled.store(true, Ordering::SeqCst);
        info!("scheduler enabled");
    }

    pub fn disable_scheduler(&self) {
        self.scheduler_enabled.store(false, Ordering::SeqCst);
        info!("scheduler disabled");
    }

    /// Evaluate one (strategy, symbol, account) immediately, bypassing the
    /// timer but not the policy or risk gates.
    pub async fn trigger_evaluation(
        &self,
        strategy_id: &str,
        symbol: &str,
        account_id: &str,
    ) -> Result<EvalOutcome> {
        StrategyScheduler::new(Arc::clone(&self.sched_deps))
            .trigger(strategy_id, symbol, account_id, Utc::now())
            .await
    }

    /// Add symbols to the tick subscription set; their ticks join the same
    /// validate → cache → aggregate pipeline as the boot-time set.
    pub async fn subscribe_symbols(&self, symbols: &[String]) -> Result<SubscriptionId> {
        let tick_tx = self.tick_tx.clone();
        let handler: sp_broker::TickHandler = Arc::new(move |tick| {
            let _ = tick_tx.send(tick);
        });
        let sub = self
            .broker
            .subscribe_ticks(symbols, handler)
            .await
            .map_err(|e| anyhow!("tick subscription failed: {e}"))?;
        self.subscriptions.lock().push(sub);
        Ok(sub)
    }

    pub async fn unsubscribe(&self, sub: SubscriptionId) -> Result<()> {
        self.broker
            .unsubscribe(sub)
            .await
            .map_err(|e| anyhow!("unsubscribe failed: {e}"))?;
        self.subscriptions.lock().retain(|s| *s != sub);
        Ok(())
    }

    /// Abort every background task. Idempotent.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("runtime stopped");
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Wiring helpers
// ---------------------------------------------------------------------------

fn build_calendar(config: &AppConfig, tz: Tz) -> Result<Option<MarketCalendar>> {
    if !config.market.check_enabled {
        return Ok(None);
    }
    let mut sessions = Vec::new();
    for name in &config.market.allowed_sessions {
        sessions.push(
            Session::parse(name).ok_or_else(|| anyhow!("unknown market session: {name}"))?,
        );
    }
    Ok(Some(MarketCalendar::new(
        tz,
        sessions,
        config.market.public_holidays.iter().copied(),
    )))
}

fn global_rule_from_config(config: &AppConfig) -> RiskRule {
    RiskRule {
        rule_id: "global-default".to_string(),
        scope: RiskScope::Global,
        account_id: None,
        symbol: None,
        max_position_value_per_symbol: Some(config.risk.max_position_value_per_symbol),
        max_open_orders: Some(config.risk.max_open_orders),
        max_orders_per_minute: Some(config.risk.max_orders_per_minute),
        daily_loss_limit: Some(config.risk.daily_loss_limit),
        consecutive_order_failures_limit: Some(config.risk.consecutive_order_failures_limit),
        active: true,
    }
}

/// First boot on an empty database gets the configured GLOBAL rule as a
/// real row; operators refine from there.
async fn seed_global_rule(pool: &PgPool, rule: &RiskRule) -> Result<()> {
    let mut tx = pool.begin().await.context("begin seed tx")?;
    if !sp_db::risk::any_rule_exists(&mut tx).await? {
        sp_db::risk::upsert_rule(&mut tx, rule, Utc::now()).await?;
        info!("seeded GLOBAL risk rule from configuration");
    }
    tx.commit().await.context("commit seed")?;
    Ok(())
}

fn build_broker(
    config: &AppConfig,
    pool: &PgPool,
    cache: &Arc<MarketDataCache>,
    tasks: &mut Vec<JoinHandle<()>>,
) -> Result<Arc<dyn BrokerAdapter>> {
    match config.market_data.mode {
        MarketDataMode::Stub => {
            let stub = StubBroker::new();
            if !config.market_data.symbols.is_empty() {
                tasks.push(stub.spawn_tick_generator(
                    config.market_data.symbols.clone(),
                    Decimal::from(70_000u64),
                    Duration::from_secs(1),
                ));
            }
            info!("broker adapter: STUB (synthetic ticks, ack-all)");
            Ok(Arc::new(stub))
        }
        MarketDataMode::Paper => {
            let price_cache = Arc::clone(cache);
            let paper = PaperBroker::new(Arc::new(move |symbol: &str| {
                price_cache.latest_price(symbol)
            }));
            info!("broker adapter: PAPER (simulated brokerage)");
            Ok(Arc::new(paper))
        }
        MarketDataMode::Live => {
            let app_key = std::env::var(&config.broker.app_key_env)
                .with_context(|| format!("missing env var {}", config.broker.app_key_env))?;
            let app_secret = std::env::var(&config.broker.app_secret_env)
                .with_context(|| format!("missing env var {}", config.broker.app_secret_env))?;

            let tokens = Arc::new(TokenManager::new(
                format!("{}/oauth/token", config.broker.base_url),
                TokenCredentials {
                    app_key,
                    app_secret,
                },
                config.broker.token_refresh_lead_ms,
                Some(pool.clone()),
            ));
            let live = LiveBroker::connect(
                LiveBrokerConfig {
                    base_url: config.broker.base_url.clone(),
                    ws_url: config.broker.ws_url.clone(),
                },
                tokens,
            );
            if cfg!(feature = "live-broker") {
                info!("broker adapter: LIVE (submission enabled)");
            } else {
                info!("broker adapter: LIVE streams only (submission compiled out)");
            }
            Ok(live)
        }
    }
}
