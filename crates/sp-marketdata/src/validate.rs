//! Tick admission checks, applied before any tick reaches the cache or the
//! aggregator. Invalid ticks are dropped with a log line, never retried.

use chrono::{DateTime, Duration, Utc};
use sp_domain::Tick;
use thiserror::Error;

/// Maximum tolerated clock skew ahead of wall clock.
const MAX_FUTURE_SKEW_SECS: i64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TickValidationError {
    #[error("tick price must be positive")]
    NonPositivePrice,
    #[error("tick volume must be non-negative")]
    NegativeVolume,
    #[error("tick timestamp is more than {MAX_FUTURE_SKEW_SECS}s in the future")]
    FutureTimestamp,
    #[error("tick symbol is empty")]
    EmptySymbol,
}

pub fn validate_tick(tick: &Tick, now: DateTime<Utc>) -> Result<(), TickValidationError> {
    if tick.symbol.is_empty() {
        return Err(TickValidationError::EmptySymbol);
    }
    if tick.price <= rust_decimal::Decimal::ZERO {
        return Err(TickValidationError::NonPositivePrice);
    }
    if tick.volume < 0 {
        return Err(TickValidationError::NegativeVolume);
    }
    if tick.timestamp > now + Duration::seconds(MAX_FUTURE_SKEW_SECS) {
        return Err(TickValidationError::FutureTimestamp);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn tick(price: rust_decimal::Decimal, volume: i64, skew_secs: i64) -> (Tick, DateTime<Utc>) {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap();
        (
            Tick {
                symbol: "005930".into(),
                price,
                volume,
                timestamp: now + Duration::seconds(skew_secs),
                status_code: "0".into(),
            },
            now,
        )
    }

    #[test]
    fn accepts_ordinary_tick() {
        let (t, now) = tick(dec!(70000), 10, 0);
        assert_eq!(validate_tick(&t, now), Ok(()));
    }

    #[test]
    fn rejects_bad_price_and_volume() {
        let (t, now) = tick(dec!(0), 10, 0);
        assert_eq!(validate_tick(&t, now), Err(TickValidationError::NonPositivePrice));
        let (t, now) = tick(dec!(70000), -1, 0);
        assert_eq!(validate_tick(&t, now), Err(TickValidationError::NegativeVolume));
    }

    #[test]
    fn future_skew_boundary() {
        let (t, now) = tick(dec!(70000), 10, 60);
        assert_eq!(validate_tick(&t, now), Ok(()));
        let (t, now) = tick(dec!(70000), 10, 61);
        assert_eq!(validate_tick(&t, now), Err(TickValidationError::FutureTimestamp));
    }
}
