//! Controller events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the controller, its task queue and
//! the subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: the lifecycle loop (status, hot mode, suspend), producer
//!   calls (queue deltas, cancel and quit), status listeners (custom events put
//!   into the event bag) and `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the controller's subscriber listener, which fans out to
//!   `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
