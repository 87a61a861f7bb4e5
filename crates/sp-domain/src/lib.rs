//! Shared domain model for the trading core.
//!
//! Everything here is a plain record or enum: no IO handles, no pool
//! references, no lazy loading. Relationships between entities are foreign
//! ids resolved by explicit repository lookups in `sp-db`.

pub mod decimal;
pub mod event;
pub mod ids;
pub mod market;
pub mod order;
pub mod position;
pub mod risk;
pub mod strategy;

pub use decimal::{round_indicator, round_money, round_price, INDICATOR_SCALE, MONEY_SCALE, PRICE_SCALE};
pub use event::{EventType, OutboxEvent};
pub use ids::new_id;
pub use market::{Bar, Tick, Timeframe};
pub use order::{Fill, Order, OrderStatus, OrderType, Side};
pub use position::{PnlLedgerEntry, Position};
pub use risk::{KillSwitchState, RiskRule, RiskScope, RiskState, GLOBAL_SCOPE_KEY};
pub use strategy::{
    Signal, SignalType, Strategy, StrategyStatus, StrategySymbol, StrategyVersion, TradeMode,
};
