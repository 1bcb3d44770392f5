//! Progress events for codeloop runs
//!
//! This crate provides the event bus and the event types a live progress
//! display subscribes to while an orchestration run is in flight.

mod bus;
mod types;

pub use bus::{EventBus, RunSubscription};
pub use types::*;
