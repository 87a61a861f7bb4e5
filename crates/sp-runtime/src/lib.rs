//! Process composition: the [`App`] wires every component together at
//! startup, owns the background loops (scheduler, outbox publisher, market
//! data pipeline), and exposes the operator surface as typed methods.

pub mod app;
pub mod publisher;
pub mod scheduler;

pub use app::App;
pub use publisher::{LogConsumer, OutboxConsumer, OutboxPublisher};
pub use scheduler::{EvalOutcome, ScheduleSpec, SchedulerDeps, StrategyScheduler};
