//! # Task abstraction.
//!
//! This module defines the [`Task`] trait: a unit of work submitted to a controller,
//! with an identity (type id), a human label, a submit category and a lifecycle callback.
//! The common handle type is [`TaskRef`], an `Arc<dyn Task>`.
//!
//! A task runs on the lifecycle loop with a [`ToolService`] (the lifecycle-only view of
//! the controller) and a [`Progress`] tracker it should check for cancellation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Progress, ToolService};
use crate::error::TaskError;

/// Shared handle to a task.
pub type TaskRef = Arc<dyn Task>;

/// Origin of a submission. Drives resume details, never scheduling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubmitType {
    /// Typed into the console.
    Console,
    /// Sent from an editor.
    Editor,
    /// Issued by tool views (variable viewers, help, ...).
    Tools,
    /// Anything else, including controller internals.
    #[default]
    Other,
}

/// Lifecycle notification delivered to [`Task::changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskEvent {
    /// Added to a queue.
    AddingTo,
    /// Removed from a queue without running.
    RemovingFrom,
    /// Moved into this queue from another controller.
    MovingTo,
    /// About to be moved to another controller. The only vetoable event.
    MovingFrom,
    /// Taken from the queue; `run` follows.
    Starting,
    /// Dropped because the controller terminated.
    BeingAbandoned,
    /// `run` returned `Ok`.
    FinishingOk,
    /// `run` failed.
    FinishingError,
    /// `run` was cancelled or stopped with an informational error.
    FinishingCancel,
}

impl TaskEvent {
    /// Whether the event takes the task out of the queue without running it.
    pub fn is_removal(self) -> bool {
        matches!(
            self,
            TaskEvent::RemovingFrom | TaskEvent::MovingFrom | TaskEvent::BeingAbandoned
        )
    }

    /// Whether the event reports the end of `run`.
    pub fn is_finishing(self) -> bool {
        matches!(
            self,
            TaskEvent::FinishingOk | TaskEvent::FinishingError | TaskEvent::FinishingCancel
        )
    }
}

/// # Unit of work executed by the lifecycle loop.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use toolvisor::{Progress, SubmitType, Task, TaskError, ToolService};
///
/// struct Ls;
///
/// #[async_trait]
/// impl Task for Ls {
///     fn type_id(&self) -> &str { "r/workspace/ls" }
///     fn label(&self) -> &str { "ls()" }
///     fn submit_type(&self) -> SubmitType { SubmitType::Tools }
///
///     async fn run(&self, service: &ToolService, progress: &Progress) -> Result<(), TaskError> {
///         if progress.is_canceled() {
///             return Err(TaskError::Canceled);
///         }
///         service.submit_to_console("ls()", progress).await
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Coarse category used for filtering (e.g. `"common/quit"`).
    fn type_id(&self) -> &str;

    /// Human-readable label.
    fn label(&self) -> &str;

    /// Submit category. Default: [`SubmitType::Other`].
    fn submit_type(&self) -> SubmitType {
        SubmitType::Other
    }

    /// Lifecycle callback, always invoked outside the controller lock.
    ///
    /// Returning `false` on [`TaskEvent::MovingFrom`] keeps the task where it is;
    /// the return value is ignored for every other event.
    fn changed(&self, event: TaskEvent) -> bool {
        let _ = event;
        true
    }

    /// Executes the task on the lifecycle loop.
    async fn run(&self, service: &ToolService, progress: &Progress) -> Result<(), TaskError>;
}
