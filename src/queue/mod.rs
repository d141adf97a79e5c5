//! # Task queue.
//!
//! The ordered work queue consumed by the lifecycle loop, with its hot lane,
//! idle-triggered entries, pause flag and the outbox of notifications produced
//! while the controller lock is held.
//!
//! ```text
//!            ┌─────────────── main lane ───────────────┐
//! front ──►  [marker 2][marker 1][t5][t6] │ [t1][t2][t3]  ◄── back (add)
//!            └─ markers ──┘└ insert_at ┘
//!
//! hot lane:  {h1, h2}   polled opportunistically, status unchanged
//! on idle:   {(u, 6s)}  polled once nothing ran for the timeout
//! ```
//!
//! The queue never calls into tasks. Every structural change appends to the
//! outbox; the controller drains it after releasing the lock and delivers
//! `changed` callbacks, status transitions and bus events in order.

mod queue;

pub(crate) use queue::{NextRunnable, Outgoing, TaskQueue};
