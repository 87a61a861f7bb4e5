//! Order lifecycle and fill application.
//!
//! Use cases take the pool, open one transaction each, and write every
//! observable state change together with its outbox event inside that
//! transaction. Domain rejections come back as values (a REJECTED order, a
//! dropped-fill outcome); only infrastructure faults are errors.

mod accounting;
mod events;
mod fill_processor;
mod idempotency;
mod orders;
mod state_machine;

pub use accounting::{apply_fill_to_position, AccountingError, PositionUpdate};
pub use events::event_payload;
pub use fill_processor::{DuplicateFilter, FillOutcome, FillProcessor, FillProcessorConfig};
pub use idempotency::derive_idempotency_key;
pub use orders::{
    cancel_order, modify_order, place_order, OrderDeps, PlaceOrderRequest, UseCaseError,
};
pub use state_machine::can_transition;
