//! # Event Handlers
//!
//! Message handlers fed by the broker connector.

pub mod events;
pub mod payload;

pub use events::{EventError, EventOutcome, EventsService, PROCESS_EVENT_TASK};
pub use payload::{QueueEvent, EXECUTED_EVENT, PROPOSED_EVENT};
