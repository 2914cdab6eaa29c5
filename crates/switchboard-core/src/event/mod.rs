//! Event bus for backend-originated events.
//!
//! Provides an `EventBus` that delivers `BackendEvent`s to the bots
//! subscribed to each event kind, in subscription order.

pub mod bus;

pub use bus::{DeliveryReport, EventBus, EventHandler, handler_fn};
