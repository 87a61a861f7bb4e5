//! Typed configuration schema with serde defaults.
//!
//! Every knob named in the operator documentation appears here; unset keys
//! take the defaults below, so a minimal deployment can ship an almost-empty
//! YAML file.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub risk: RiskDefaults,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Adapter variant selector. STUB generates synthetic ticks and must be
/// disabled in production layers; LIVE submission additionally requires the
/// `live-broker` cargo feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketDataMode {
    Stub,
    Paper,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    #[serde(default = "default_md_mode")]
    pub mode: MarketDataMode,
    /// Initial tick-subscription set.
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            mode: default_md_mode(),
            symbols: Vec::new(),
        }
    }
}

fn default_md_mode() -> MarketDataMode {
    MarketDataMode::Stub
}

// ---------------------------------------------------------------------------
// Market hours
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Toggles the market-hours pre-trade check.
    #[serde(default = "default_true")]
    pub check_enabled: bool,
    /// Subset of REGULAR / PRE_MARKET / AFTER_HOURS_CLOSING / AFTER_HOURS.
    #[serde(default = "default_sessions")]
    pub allowed_sessions: Vec<String>,
    #[serde(default)]
    pub public_holidays: Vec<NaiveDate>,
    /// IANA timezone of the exchange.
    #[serde(default = "default_tz")]
    pub timezone: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            check_enabled: true,
            allowed_sessions: default_sessions(),
            public_holidays: Vec::new(),
            timezone: default_tz(),
        }
    }
}

fn default_sessions() -> Vec<String> {
    vec!["REGULAR".to_string()]
}

fn default_tz() -> String {
    "Asia/Seoul".to_string()
}

// ---------------------------------------------------------------------------
// Risk defaults
// ---------------------------------------------------------------------------

/// Fallback GLOBAL rule seeded at startup when no rule rows exist yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDefaults {
    #[serde(default = "default_max_position_value")]
    pub max_position_value_per_symbol: Decimal,
    #[serde(default = "default_max_open_orders")]
    pub max_open_orders: i64,
    #[serde(default = "default_max_orders_per_minute")]
    pub max_orders_per_minute: i64,
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: Decimal,
    #[serde(default = "default_consecutive_failures")]
    pub consecutive_order_failures_limit: i64,
    /// SELL below a flat position opens a short only when enabled.
    #[serde(default)]
    pub allow_short: bool,
}

impl Default for RiskDefaults {
    fn default() -> Self {
        Self {
            max_position_value_per_symbol: default_max_position_value(),
            max_open_orders: default_max_open_orders(),
            max_orders_per_minute: default_max_orders_per_minute(),
            daily_loss_limit: default_daily_loss_limit(),
            consecutive_order_failures_limit: default_consecutive_failures(),
            allow_short: false,
        }
    }
}

fn default_max_position_value() -> Decimal {
    Decimal::new(10_000_000, 0)
}

fn default_max_open_orders() -> i64 {
    10
}

fn default_max_orders_per_minute() -> i64 {
    10
}

fn default_daily_loss_limit() -> Decimal {
    Decimal::new(1_000_000, 0)
}

fn default_consecutive_failures() -> i64 {
    5
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub strategy_execution_enabled: bool,
    /// Evaluation period. Default: every minute.
    #[serde(default = "default_sched_every")]
    pub strategy_execution_every_secs: u64,
    /// Second-of-minute alignment for the first fire.
    #[serde(default)]
    pub strategy_execution_at_second: u32,
    /// Per-evaluation task timeout.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
    /// Bounded worker-pool width for strategy fan-out.
    #[serde(default = "default_workers")]
    pub max_concurrent_evaluations: usize,
    /// Outbox publisher poll delay.
    #[serde(default = "default_outbox_delay")]
    pub outbox_publisher_fixed_delay_ms: u64,
    /// Fallback (symbol, account) when a strategy has no mappings; `None`
    /// skips such strategies.
    #[serde(default)]
    pub default_symbol: Option<String>,
    #[serde(default)]
    pub default_account: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy_execution_enabled: true,
            strategy_execution_every_secs: default_sched_every(),
            strategy_execution_at_second: 0,
            task_timeout_secs: default_task_timeout(),
            max_concurrent_evaluations: default_workers(),
            outbox_publisher_fixed_delay_ms: default_outbox_delay(),
            default_symbol: None,
            default_account: None,
        }
    }
}

fn default_sched_every() -> u64 {
    60
}

fn default_task_timeout() -> u64 {
    30
}

fn default_workers() -> usize {
    8
}

fn default_outbox_delay() -> u64 {
    1_000
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// REST base URL of the brokerage gateway.
    #[serde(default)]
    pub base_url: String,
    /// WebSocket stream URL.
    #[serde(default)]
    pub ws_url: String,
    /// Refresh the access token this long before expiry.
    #[serde(default = "default_refresh_lead")]
    pub token_refresh_lead_ms: i64,
    /// App credentials are taken from the environment, never from files;
    /// these name the variables to read.
    #[serde(default = "default_key_env")]
    pub app_key_env: String,
    #[serde(default = "default_secret_env")]
    pub app_secret_env: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            ws_url: String::new(),
            token_refresh_lead_ms: default_refresh_lead(),
            app_key_env: default_key_env(),
            app_secret_env: default_secret_env(),
        }
    }
}

fn default_refresh_lead() -> i64 {
    300_000
}

fn default_key_env() -> String {
    "SP_BROKER_APP_KEY".to_string()
}

fn default_secret_env() -> String {
    "SP_BROKER_APP_SECRET".to_string()
}

fn default_true() -> bool {
    true
}
