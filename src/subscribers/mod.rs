//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out and
//! the built-in [`LogWriter`] for events broadcast through the [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   lifecycle loop / producers ── publish(Event) ──► Bus
//!                                                     │
//!                                    subscriber listener (one per controller)
//!                                                     │
//!                                                     ▼
//!                                               SubscriberSet
//!                                          ┌──────────┼──────────┐
//!                                          ▼          ▼          ▼
//!                                      LogWriter    Audit     Custom ...
//! ```

mod embedded;
mod set;
mod subscriber;

pub use embedded::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
