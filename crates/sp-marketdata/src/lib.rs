//! Market-data pipeline: tick validation → latest-tick cache → bar
//! aggregation → two-tier bar store.
//!
//! Per-symbol tick order is preserved by the adapter's delivery threads; the
//! locks here are held only across in-memory folds, never across awaits.

mod aggregator;
mod cache;
mod store;
mod validate;

pub use aggregator::BarAggregator;
pub use cache::MarketDataCache;
pub use store::BarStore;
pub use validate::{validate_tick, TickValidationError};
