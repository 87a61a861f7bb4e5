//! Tick → bar folding.
//!
//! One open bar per (symbol, timeframe). A tick whose bucket is newer than
//! the open bar seals the old bar and opens a new one; a wall-clock sweep
//! ([`BarAggregator::seal_elapsed`]) seals bars whose bucket has ended with
//! no follow-on tick. Sealed bars are returned to the caller for
//! persistence — the aggregator itself never touches IO.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;

use sp_domain::{Bar, Tick, Timeframe};

pub struct BarAggregator {
    timeframes: Vec<Timeframe>,
    open: Mutex<HashMap<(String, Timeframe), Bar>>,
}

impl BarAggregator {
    pub fn new(timeframes: impl IntoIterator<Item = Timeframe>) -> Self {
        Self {
            timeframes: timeframes.into_iter().collect(),
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Fold one validated tick. Returns the bars this tick sealed (zero or
    /// one per timeframe).
    pub fn on_tick(&self, tick: &Tick) -> Vec<Bar> {
        let mut sealed = Vec::new();
        let mut open = self.open.lock();

        for &tf in &self.timeframes {
            let bucket = tf.bucket_start(tick.timestamp);
            let key = (tick.symbol.clone(), tf);

            match open.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(Bar::open_from_tick(tick, tf));
                }
                Entry::Occupied(mut slot) => {
                    let bar = slot.get_mut();
                    if bar.bar_ts < bucket {
                        let mut done = bar.clone();
                        done.closed = true;
                        sealed.push(done);
                        *bar = Bar::open_from_tick(tick, tf);
                    } else if bar.bar_ts > bucket {
                        // Late tick for an already-sealed bucket. Sealed bars
                        // are immutable; drop it for this timeframe.
                        warn!(
                            symbol = %tick.symbol,
                            timeframe = tf.as_str(),
                            tick_ts = %tick.timestamp,
                            "late tick for sealed bucket dropped"
                        );
                    } else {
                        bar.fold(tick);
                    }
                }
            }
        }

        sealed
    }

    /// Seal every open bar whose bucket has ended by `now`. Driven by a
    /// periodic sweep so quiet symbols still close their bars.
    pub fn seal_elapsed(&self, now: DateTime<Utc>) -> Vec<Bar> {
        let mut open = self.open.lock();
        let mut sealed = Vec::new();

        open.retain(|_, bar| {
            if now >= bar.bucket_end() {
                let mut done = bar.clone();
                done.closed = true;
                sealed.push(done);
                false
            } else {
                true
            }
        });

        sealed
    }

    /// Snapshot of the current open bar, if any.
    pub fn open_bar(&self, symbol: &str, timeframe: Timeframe) -> Option<Bar> {
        self.open
            .lock()
            .get(&(symbol.to_string(), timeframe))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn tick(secs: i64, price: Decimal, volume: i64) -> Tick {
        Tick {
            symbol: "005930".into(),
            price,
            volume,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap()
                + chrono::Duration::seconds(secs),
            status_code: "0".into(),
        }
    }

    #[test]
    fn first_tick_opens_bar() {
        let agg = BarAggregator::new([Timeframe::M1]);
        assert!(agg.on_tick(&tick(5, dec!(100), 10)).is_empty());
        let bar = agg.open_bar("005930", Timeframe::M1).unwrap();
        assert_eq!(bar.open, dec!(100));
        assert_eq!(bar.volume, 10);
        assert!(!bar.closed);
    }

    #[test]
    fn bucket_rollover_seals_previous() {
        let agg = BarAggregator::new([Timeframe::M1]);
        agg.on_tick(&tick(5, dec!(100), 10));
        agg.on_tick(&tick(30, dec!(105), 5));
        let sealed = agg.on_tick(&tick(65, dec!(102), 3));
        assert_eq!(sealed.len(), 1);
        let done = &sealed[0];
        assert!(done.closed);
        assert_eq!(done.open, dec!(100));
        assert_eq!(done.high, dec!(105));
        assert_eq!(done.close, dec!(105));
        assert_eq!(done.volume, 15);
        // New open bar holds the rollover tick.
        let open = agg.open_bar("005930", Timeframe::M1).unwrap();
        assert_eq!(open.open, dec!(102));
        assert_eq!(open.volume, 3);
    }

    #[test]
    fn wall_clock_sweep_seals_quiet_symbols() {
        let agg = BarAggregator::new([Timeframe::M1]);
        agg.on_tick(&tick(5, dec!(100), 10));
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 9, 1, 0).unwrap();
        let sealed = agg.seal_elapsed(now);
        assert_eq!(sealed.len(), 1);
        assert!(sealed[0].closed);
        assert!(agg.open_bar("005930", Timeframe::M1).is_none());
        // Sweep again: nothing left to seal.
        assert!(agg.seal_elapsed(now).is_empty());
    }

    #[test]
    fn late_tick_does_not_mutate_sealed_bucket() {
        let agg = BarAggregator::new([Timeframe::M1]);
        agg.on_tick(&tick(5, dec!(100), 10));
        let sealed = agg.on_tick(&tick(65, dec!(102), 3));
        assert_eq!(sealed.len(), 1);
        // A tick from the sealed bucket arrives late.
        agg.on_tick(&tick(10, dec!(999), 1));
        let open = agg.open_bar("005930", Timeframe::M1).unwrap();
        assert_eq!(open.high, dec!(102), "late tick must not fold anywhere");
    }

    #[test]
    fn multiple_timeframes_fold_independently() {
        let agg = BarAggregator::new([Timeframe::M1, Timeframe::M5]);
        agg.on_tick(&tick(5, dec!(100), 10));
        let sealed = agg.on_tick(&tick(65, dec!(101), 1));
        // The 1m bar rolls over; the 5m bar keeps folding.
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].timeframe, Timeframe::M1);
        let m5 = agg.open_bar("005930", Timeframe::M5).unwrap();
        assert_eq!(m5.volume, 11);
    }
}
