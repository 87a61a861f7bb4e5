//! Broker failure classification.
//!
//! Retryability is a property of the kind, not the call site: network,
//! rate-limit, and server-side faults back off and retry; authentication and
//! request-level rejections surface immediately.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerErrorKind {
    /// Transport-level failure (connect, timeout, reset).
    Network,
    /// Venue throttling (HTTP 429 or equivalent).
    RateLimit,
    /// Gateway 5xx.
    ServerError,
    /// Token issue/refresh failed or credentials rejected. Surfaces to the
    /// operator; must not trip the kill switch by itself.
    Authentication,
    /// Malformed or unprocessable request.
    InvalidRequest,
    /// The venue rejected the order.
    OrderRejected,
    /// Account cannot cover the order.
    InsufficientBalance,
}

impl BrokerErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerErrorKind::Network | BrokerErrorKind::RateLimit | BrokerErrorKind::ServerError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerErrorKind::Network => "NETWORK",
            BrokerErrorKind::RateLimit => "RATE_LIMIT",
            BrokerErrorKind::ServerError => "SERVER_ERROR",
            BrokerErrorKind::Authentication => "AUTHENTICATION",
            BrokerErrorKind::InvalidRequest => "INVALID_REQUEST",
            BrokerErrorKind::OrderRejected => "ORDER_REJECTED",
            BrokerErrorKind::InsufficientBalance => "INSUFFICIENT_BALANCE",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("broker error [{}]: {message}", kind.as_str())]
pub struct BrokerError {
    pub kind: BrokerErrorKind,
    pub message: String,
}

impl BrokerError {
    pub fn new(kind: BrokerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::Network, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::Authentication, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::InvalidRequest, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_split() {
        for kind in [
            BrokerErrorKind::Network,
            BrokerErrorKind::RateLimit,
            BrokerErrorKind::ServerError,
        ] {
            assert!(kind.is_retryable(), "{kind:?}");
        }
        for kind in [
            BrokerErrorKind::Authentication,
            BrokerErrorKind::InvalidRequest,
            BrokerErrorKind::OrderRejected,
            BrokerErrorKind::InsufficientBalance,
        ] {
            assert!(!kind.is_retryable(), "{kind:?}");
        }
    }
}
