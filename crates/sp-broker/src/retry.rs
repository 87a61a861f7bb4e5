//! Shared retry/backoff for broker calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::BrokerError;

/// Exponential backoff: `initial × multiplier^n`, capped. An attempt budget
/// of `max_attempts` includes the first try.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub multiplier: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Order submit/cancel/modify: 1s, ×2, cap 10s, 3 attempts.
    pub const ORDER: RetryPolicy = RetryPolicy {
        initial: Duration::from_secs(1),
        multiplier: 2,
        cap: Duration::from_secs(10),
        max_attempts: 3,
    };

    /// Queries (token refresh, snapshots): same curve, 5 attempts.
    pub const QUERY: RetryPolicy = RetryPolicy {
        initial: Duration::from_secs(1),
        multiplier: 2,
        cap: Duration::from_secs(10),
        max_attempts: 5,
    };

    /// Delay before retry number `retry` (0-based: the wait after the first
    /// failure is `initial`).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry);
        self.initial.saturating_mul(factor).min(self.cap)
    }

    /// Run `op`, retrying retryable failures until the attempt budget is
    /// exhausted. The final error is returned unchanged — the caller treats
    /// an exhausted retryable failure as terminal.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, BrokerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay(attempt);
                    warn!(
                        kind = e.kind.as_str(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "broker call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrokerErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_curve_is_capped() {
        let p = RetryPolicy::ORDER;
        assert_eq!(p.delay(0), Duration::from_secs(1));
        assert_eq!(p.delay(1), Duration::from_secs(2));
        assert_eq!(p.delay(2), Duration::from_secs(4));
        assert_eq!(p.delay(3), Duration::from_secs(8));
        assert_eq!(p.delay(4), Duration::from_secs(10));
        assert_eq!(p.delay(20), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_until_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), BrokerError> = RetryPolicy::ORDER
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BrokerError::network("connection reset")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), BrokerError> = RetryPolicy::ORDER
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(BrokerError::new(
                        BrokerErrorKind::InsufficientBalance,
                        "no cash",
                    ))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn eventual_success_returns_value() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::QUERY
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(BrokerError::network("flaky"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
