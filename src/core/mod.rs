//! Runtime core: the controller of one tool session.
//!
//! The only entry points are [`Controller`] (built with [`ControllerBuilder`])
//! and the [`ToolBackend`] trait the tool implements. Everything else here is
//! the machinery behind them.
//!
//! Internal modules:
//! - [`state`]: lock-protected state (queue, control lane, status, suspend levels);
//! - [`controller`]: producer-facing handle and the lock/outbox discipline;
//! - [`run_loop`]: the lifecycle loop and task dispatch;
//! - [`suspend`]: nested suspend loops with LIFO unwinding;
//! - [`hot`]: hot mode (status-neutral tasks);
//! - [`cancel`]: cancellation, quit and kill;
//! - [`tool`]: the backend trait and the service handed to tasks;
//! - [`handlers`]: command-handler registry ids and arguments.

mod builder;
mod cancel;
mod config;
mod controller;
mod handlers;
mod hot;
mod progress;
mod run_loop;
mod state;
mod status;
mod suspend;
mod tool;

pub use builder::ControllerBuilder;
pub use cancel::CancelOptions;
pub use config::ControllerConfig;
pub use controller::Controller;
pub use handlers::{
    CommandArgs, CommandHandler, LOGIN_REQUEST, REPORT_STATUS, RUN_BLOCKING, SCHEDULE_QUIT,
};
pub use progress::Progress;
pub use status::{HotTasksState, StatusChange, StatusListener, ToolStatus};
pub use tool::{ToolBackend, ToolService};

#[cfg(test)]
mod tests;
