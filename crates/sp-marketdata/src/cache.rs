//! Latest-tick cache: one slot per symbol, replaced on every accepted tick.
//! Read by risk-exposure projection for MARKET orders and by the paper
//! broker for marking fills.

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use sp_domain::Tick;

#[derive(Default)]
pub struct MarketDataCache {
    latest: RwLock<HashMap<String, Tick>>,
}

impl MarketDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the symbol's latest tick. Ticks arrive in per-symbol order,
    /// so last-write-wins is exactly "latest".
    pub fn update(&self, tick: Tick) {
        self.latest.write().insert(tick.symbol.clone(), tick);
    }

    pub fn latest(&self, symbol: &str) -> Option<Tick> {
        self.latest.read().get(symbol).cloned()
    }

    pub fn latest_price(&self, symbol: &str) -> Option<Decimal> {
        self.latest.read().get(symbol).map(|t| t.price)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.latest.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn last_write_wins() {
        let cache = MarketDataCache::new();
        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap();
        for (i, price) in [dec!(100), dec!(101), dec!(99)].into_iter().enumerate() {
            cache.update(Tick {
                symbol: "005930".into(),
                price,
                volume: 1,
                timestamp: ts + chrono::Duration::seconds(i as i64),
                status_code: "0".into(),
            });
        }
        assert_eq!(cache.latest_price("005930"), Some(dec!(99)));
        assert_eq!(cache.latest_price("000660"), None);
    }
}
