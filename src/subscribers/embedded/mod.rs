//! # Built-in subscribers
//!
//! - [`LogWriter`]: renders controller events through `tracing`.

mod log;

pub use log::LogWriter;
