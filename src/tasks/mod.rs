//! # Task abstractions.
//!
//! This module provides the task-related types:
//! - [`Task`] - trait for units of work executed by the lifecycle loop
//! - [`TaskFn`] - function-based task implementation
//! - [`TaskRef`] - shared reference to a task (`Arc<dyn Task>`)
//! - [`Runnable`] - queue entry wrapping a task or a controller command
//! - [`ResumeCommand`] - commands that leave a suspend level

mod runnable;
mod task;
mod task_fn;

pub(crate) use runnable::RunnableKind;
pub use runnable::{
    CONSOLE_INPUT_TYPE_ID, QUIT_TYPE_ID, RESUME_TYPE_ID, ResumeCommand, Runnable, RunnableRef,
    START_TYPE_ID, STEP_INTO_TYPE_ID, STEP_OVER_TYPE_ID, STEP_RETURN_TYPE_ID,
    SUSPENDED_INSERT_TYPE_ID, SUSPENDED_UPDATE_TYPE_ID,
};
pub use task::{SubmitType, Task, TaskEvent, TaskRef};
pub use task_fn::TaskFn;
