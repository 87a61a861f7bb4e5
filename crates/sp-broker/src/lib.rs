//! Brokerage gateway adapters.
//!
//! One capability set ([`BrokerAdapter`]), three variants:
//!
//! - [`StubBroker`] — synthetic ticks on a timer, acks every order; the
//!   default for tests, must be configured off in production.
//! - [`PaperBroker`] — deterministic in-memory simulated brokerage; the
//!   production default until an explicit LIVE promotion.
//! - [`LiveBroker`] — real gateway REST + streams; order submission is
//!   additionally gated behind the `live-broker` cargo feature.

mod adapter;
mod error;
mod live;
mod paper;
mod reconnect;
mod retry;
mod stub;
mod token;

pub use adapter::{
    BrokerAck, BrokerAdapter, FillHandler, OrderTicket, SubscriptionId, TickHandler,
};
pub use error::{BrokerError, BrokerErrorKind};
pub use live::{LiveBroker, LiveBrokerConfig};
pub use paper::PaperBroker;
pub use reconnect::{HeartbeatConfig, HeartbeatState, ReconnectPolicy};
pub use retry::RetryPolicy;
pub use stub::StubBroker;
pub use token::{AccessToken, TokenCredentials, TokenManager};
