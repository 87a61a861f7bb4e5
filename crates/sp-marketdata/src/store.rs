//! Two-tier bar store: bounded in-memory recency window per
//! (symbol, timeframe) over the durable table. Writes go durable-first, then
//! populate the cache; reads are cache-first with a range-query fallback.

use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use parking_lot::RwLock;
use sqlx::PgPool;

use sp_domain::{Bar, Timeframe};

/// Bars kept in memory per (symbol, timeframe).
const CACHE_CAP: usize = 200;

pub struct BarStore {
    pool: PgPool,
    cache: RwLock<HashMap<(String, Timeframe), VecDeque<Bar>>>,
}

impl BarStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Persist a bar (open update or seal), then refresh the cache entry.
    /// Durable write first: a crash between the two leaves the cache cold,
    /// never wrong.
    pub async fn persist(&self, bar: &Bar) -> Result<()> {
        sp_db::bars::upsert(&self.pool, bar).await?;

        let mut cache = self.cache.write();
        let window = cache
            .entry((bar.symbol.clone(), bar.timeframe))
            .or_default();

        if let Some(idx) = window.iter().position(|b| b.bar_ts == bar.bar_ts) {
            // Sealed bars are immutable; only refresh a still-open slot.
            if !window[idx].closed {
                window[idx] = bar.clone();
            }
        } else {
            window.push_back(bar.clone());
            while window.len() > CACHE_CAP {
                window.pop_front();
            }
        }
        Ok(())
    }

    /// Most recent `n` bars, chronological. Served from memory when the
    /// window is deep enough, otherwise from the durable table (which then
    /// warms the cache).
    pub async fn recent_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: usize,
    ) -> Result<Vec<Bar>> {
        {
            let cache = self.cache.read();
            if let Some(window) = cache.get(&(symbol.to_string(), timeframe)) {
                if window.len() >= n {
                    return Ok(window.iter().skip(window.len() - n).cloned().collect());
                }
            }
        }

        let bars = sp_db::bars::recent(&self.pool, symbol, timeframe, n as i64).await?;

        let mut cache = self.cache.write();
        let window = cache
            .entry((symbol.to_string(), timeframe))
            .or_default();
        if window.len() < bars.len() {
            *window = bars.iter().cloned().collect();
        }

        Ok(bars)
    }

    /// Cached window depth; status surface.
    pub fn cached_len(&self, symbol: &str, timeframe: Timeframe) -> usize {
        self.cache
            .read()
            .get(&(symbol.to_string(), timeframe))
            .map_or(0, |w| w.len())
    }
}
