//! Market-data types: ticks, timeframes, OHLCV bars.

use chrono::{DateTime, Duration, DurationRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::new_id;

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

/// A single market trade event. Immutable; consumed by the bar aggregator
/// and the latest-tick cache, then discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    /// Trade price, > 0.
    pub price: Decimal,
    /// Trade volume, >= 0.
    pub volume: i64,
    /// Exchange timestamp, millisecond precision.
    pub timestamp: DateTime<Utc>,
    /// Venue status code as delivered by the feed (e.g. "0" = regular trade).
    pub status_code: String,
}

// ---------------------------------------------------------------------------
// Timeframe
// ---------------------------------------------------------------------------

/// Bar bucket width. Closed set: the aggregator and the bar store only ever
/// deal with these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Timeframe::M1),
            "5m" => Some(Timeframe::M5),
            "1d" => Some(Timeframe::D1),
            _ => None,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::D1 => Duration::days(1),
        }
    }

    /// Inclusive start of the bucket containing `ts` (floor). Daily buckets
    /// floor to UTC midnight; intraday buckets floor to the minute grid.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        // duration_trunc cannot fail for these spans on in-range timestamps.
        ts.duration_trunc(self.duration()).unwrap_or(ts)
    }

    /// Exclusive end of the bucket containing `ts`.
    pub fn bucket_end(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.bucket_start(ts) + self.duration()
    }
}

// ---------------------------------------------------------------------------
// Bar
// ---------------------------------------------------------------------------

/// A time-bucketed OHLCV aggregate. Unique by (symbol, timeframe, bar_ts).
///
/// Created open on the first tick of a bucket, folded by subsequent ticks,
/// then sealed (`closed = true`) when the bucket ends — immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub bar_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Inclusive start of the bucket.
    pub bar_ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub closed: bool,
}

impl Bar {
    /// Open a new bar from the first tick of a bucket.
    pub fn open_from_tick(tick: &Tick, timeframe: Timeframe) -> Self {
        Self {
            bar_id: new_id(),
            symbol: tick.symbol.clone(),
            timeframe,
            bar_ts: timeframe.bucket_start(tick.timestamp),
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume,
            closed: false,
        }
    }

    /// Fold a same-bucket tick into this open bar.
    ///
    /// Callers guarantee the tick belongs to this bar's bucket; sealed bars
    /// must never be folded (the aggregator enforces both).
    pub fn fold(&mut self, tick: &Tick) {
        debug_assert!(!self.closed, "fold on sealed bar");
        if tick.price > self.high {
            self.high = tick.price;
        }
        if tick.price < self.low {
            self.low = tick.price;
        }
        self.close = tick.price;
        self.volume += tick.volume;
    }

    /// Exclusive end of this bar's bucket.
    pub fn bucket_end(&self) -> DateTime<Utc> {
        self.bar_ts + self.timeframe.duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn tick(ts: DateTime<Utc>, price: Decimal, volume: i64) -> Tick {
        Tick {
            symbol: "005930".into(),
            price,
            volume,
            timestamp: ts,
            status_code: "0".into(),
        }
    }

    #[test]
    fn bucket_start_floors_to_grid() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 9, 7, 42).unwrap();
        assert_eq!(
            Timeframe::M1.bucket_start(ts),
            Utc.with_ymd_and_hms(2025, 3, 4, 9, 7, 0).unwrap()
        );
        assert_eq!(
            Timeframe::M5.bucket_start(ts),
            Utc.with_ymd_and_hms(2025, 3, 4, 9, 5, 0).unwrap()
        );
        assert_eq!(
            Timeframe::D1.bucket_start(ts),
            Utc.with_ymd_and_hms(2025, 3, 4, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn fold_updates_hlcv_keeps_open() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 1).unwrap();
        let mut bar = Bar::open_from_tick(&tick(t0, dec!(100), 10), Timeframe::M1);
        bar.fold(&tick(t0, dec!(103), 5));
        bar.fold(&tick(t0, dec!(99), 7));
        assert_eq!(bar.open, dec!(100));
        assert_eq!(bar.high, dec!(103));
        assert_eq!(bar.low, dec!(99));
        assert_eq!(bar.close, dec!(99));
        assert_eq!(bar.volume, 22);
        assert!(!bar.closed);
    }

    #[test]
    fn timeframe_round_trips_strings() {
        for tf in [Timeframe::M1, Timeframe::M5, Timeframe::D1] {
            assert_eq!(Timeframe::parse(tf.as_str()), Some(tf));
        }
        assert_eq!(Timeframe::parse("3h"), None);
    }
}
