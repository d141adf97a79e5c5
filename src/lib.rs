//! # toolvisor
//!
//! **Toolvisor** is the controller of a single-threaded interactive tool session
//! (an interpreter behind a console, a REPL behind an IDE view).
//!
//! Many producers submit work; the tool can only execute one thing at a time.
//! The controller serializes that work on one lifecycle loop, tracks the visible
//! status of the tool, serves nested debugger suspends and shuts the tool down
//! on request.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   console      editor      variable viewer      other controller
//!      │            │               │                     │
//!      │ submit     │ submit        │ submit_hot          │ move_tasks_to
//!      ▼            ▼               ▼                     ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Controller (one per tool)                                        │
//! │  - control lane  (internal commands, suspend exits)               │
//! │  - hot lane      (status-neutral tasks)                           │
//! │  - main lane     (FIFO, suspend markers at the front, on-idle)    │
//! │  - status        STARTING ─► STARTED_* ─► TERMINATED              │
//! │  - handlers      (report status, schedule quit, ...)              │
//! └──────┬───────────────────────────────────────────────┬────────────┘
//!        │ lifecycle loop (one task at a time)           │ after unlock
//!        ▼                                               ▼
//!   Task::run(&ToolService, &Progress)          status listeners (+ event bag)
//!        │                                      Task::changed(...)
//!        ▼                                      Bus ──► SubscriberSet ──► LogWriter
//!   ToolBackend (submit / quit / resume / hot mode)
//! ```
//!
//! ### Lifecycle
//! ```text
//! run()
//!   ├─► backend.start()                       STARTING
//!   ├─► loop {
//!   │     control lane first, then hot lane, then main lane
//!   │       ├─ task runs                      STARTED_PROCESSING
//!   │       ├─ tool suspends (level n)        nested loop, STARTED_SUSPENDED
//!   │       │     └─ resume command           back to the suspended task
//!   │       └─ nothing to do                  STARTED_IDLING / STARTED_PAUSED
//!   │   } until the tool is gone
//!   └─► backend.finish() ─► exit code         TERMINATED
//! ```
//!
//! ## Features
//! | Area              | Description                                                      | Key types / traits                               |
//! |-------------------|------------------------------------------------------------------|--------------------------------------------------|
//! | **Controller**    | Queue, status machine, suspend levels, hot mode, cancel and quit | [`Controller`], [`ControllerBuilder`]            |
//! | **Tool seam**     | What a concrete transport implements                             | [`ToolBackend`], [`ToolService`]                 |
//! | **Tasks**         | Units of work and their lifecycle callbacks                      | [`Task`], [`TaskFn`], [`TaskRef`], [`Runnable`]  |
//! | **Status**        | Visible status and its listeners                                 | [`ToolStatus`], [`StatusListener`]               |
//! | **Handlers**      | Named extension points (quit veto, status reports)               | [`CommandHandler`]                               |
//! | **Subscriber API**| Hook into controller events                                      | [`Subscribe`], [`Event`]                         |
//! | **Errors**        | Typed errors and status reports                                  | [`ControllerError`], [`TaskError`]               |
//! | **Configuration** | Per-controller settings                                          | [`ControllerConfig`]                             |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] rendering events through `tracing`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! use async_trait::async_trait;
//! use toolvisor::{
//!     Controller, ControllerError, Progress, SubmitType, TaskError, ToolBackend, ToolService,
//! };
//!
//! struct Echo {
//!     alive: AtomicBool,
//! }
//!
//! #[async_trait]
//! impl ToolBackend for Echo {
//!     async fn start(&self, _: &ToolService, _: &Progress) -> Result<(), ControllerError> {
//!         Ok(())
//!     }
//!     fn kill(&self) {
//!         self.alive.store(false, Ordering::SeqCst);
//!     }
//!     fn is_alive(&self) -> bool {
//!         self.alive.load(Ordering::SeqCst)
//!     }
//!     async fn submit(&self, _: &ToolService, input: &str, _: &Progress) -> Result<(), TaskError> {
//!         println!("> {input}");
//!         Ok(())
//!     }
//!     async fn quit(&self, _: &ToolService, _: &Progress) -> Result<(), TaskError> {
//!         self.alive.store(false, Ordering::SeqCst);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(Echo { alive: AtomicBool::new(true) });
//!     let controller = Controller::builder(backend).build();
//!
//!     controller.submit_text("x <- 1", SubmitType::Console)?;
//!     controller.submit_text("print(x)", SubmitType::Console)?;
//!     assert!(controller.schedule_quit().await);
//!
//!     let code = controller.run().await?;
//!     assert_eq!(code, 0);
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod policies;
mod queue;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use core::{
    CancelOptions, CommandArgs, CommandHandler, Controller, ControllerBuilder, ControllerConfig,
    HotTasksState, LOGIN_REQUEST, Progress, REPORT_STATUS, RUN_BLOCKING, SCHEDULE_QUIT,
    StatusChange, StatusListener, ToolBackend, ToolService, ToolStatus,
};
pub use error::{ControllerError, Severity, StatusReport, SubmitError, TaskError};
pub use events::{Event, EventKind};
pub use policies::{DebugDetail, DefaultResumePolicy, ResumeDetailPolicy};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{
    CONSOLE_INPUT_TYPE_ID, QUIT_TYPE_ID, RESUME_TYPE_ID, ResumeCommand, Runnable, RunnableRef,
    START_TYPE_ID, STEP_INTO_TYPE_ID, STEP_OVER_TYPE_ID, STEP_RETURN_TYPE_ID,
    SUSPENDED_INSERT_TYPE_ID, SUSPENDED_UPDATE_TYPE_ID, SubmitType, Task, TaskEvent, TaskFn,
    TaskRef,
};

// Optional: expose a simple built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
