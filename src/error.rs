//! Error types used by the controller and by tasks.
//!
//! This module defines the error enums of the crate:
//!
//! - [`ControllerError`]: errors raised by the controller lifecycle itself.
//! - [`TaskError`]: errors raised by a single task execution.
//! - [`SubmitError`]: a producer could not enqueue work.
//!
//! All of them provide `as_label` for logs. [`TaskError::is_silent`] tells the
//! lifecycle loop whether a failure is reported or treated as a quiet cancel.
//!
//! [`StatusReport`] is the value funnelled through the controller's single
//! status gate and returned by command handlers.

use thiserror::Error;

/// # Errors produced by the controller lifecycle.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// The tool could not be started; the controller never reaches a started state.
    #[error("tool startup failed: {error}")]
    Startup {
        /// The underlying error message.
        error: String,
    },

    /// `run` was called on a controller that already left `Starting`.
    #[error("controller already started")]
    AlreadyStarted,

    /// The transport does not implement the requested hook.
    #[error("operation not supported by this tool: {operation}")]
    Unsupported {
        /// Name of the hook.
        operation: &'static str,
    },
}

impl ControllerError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use toolvisor::ControllerError;
    ///
    /// let err = ControllerError::Unsupported { operation: "interrupt" };
    /// assert_eq!(err.as_label(), "controller_unsupported");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ControllerError::Startup { .. } => "controller_startup",
            ControllerError::AlreadyStarted => "controller_already_started",
            ControllerError::Unsupported { .. } => "controller_unsupported",
        }
    }

    /// Convenience constructor for [`ControllerError::Startup`].
    pub fn startup(error: impl Into<String>) -> Self {
        ControllerError::Startup {
            error: error.into(),
        }
    }
}

/// # Errors produced by task execution.
///
/// `Canceled` and `Info` have a severity of "info or below": the lifecycle loop
/// finishes the task with [`FinishingCancel`](crate::TaskEvent::FinishingCancel)
/// and reports nothing. `Fail` is a real execution error.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Task observed cancellation of its progress tracker.
    #[error("task cancelled")]
    Canceled,

    /// Task stopped early for an informational reason.
    #[error("{message}")]
    Info {
        /// Human-readable reason.
        message: String,
    },

    /// Task execution failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use toolvisor::TaskError;
    ///
    /// let err = TaskError::fail("boom");
    /// assert_eq!(err.as_label(), "task_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Canceled => "task_canceled",
            TaskError::Info { .. } => "task_info",
            TaskError::Fail { .. } => "task_failed",
        }
    }

    /// Convenience constructor for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Whether this error is finished silently (cancel or info severity).
    ///
    /// # Example
    /// ```
    /// use toolvisor::TaskError;
    ///
    /// assert!(TaskError::Canceled.is_silent());
    /// assert!(!TaskError::fail("nope").is_silent());
    /// ```
    pub fn is_silent(&self) -> bool {
        matches!(self, TaskError::Canceled | TaskError::Info { .. })
    }
}

/// Error returned by the producer-facing submit API.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The queue is closed (controller terminated).
    #[error("task queue closed")]
    Closed,

    /// The producer cancelled the submission before it was enqueued.
    #[error("submission cancelled")]
    Canceled,
}

impl SubmitError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SubmitError::Closed => "submit_closed",
            SubmitError::Canceled => "submit_canceled",
        }
    }
}

/// Severity of a [`StatusReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Ok,
    Info,
    Warning,
    Error,
    Cancel,
}

/// Outcome reported by command handlers and passed to the status gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub severity: Severity,
    pub message: String,
}

impl StatusReport {
    /// A report with severity [`Severity::Ok`] and no message.
    pub fn ok() -> Self {
        Self {
            severity: Severity::Ok,
            message: String::new(),
        }
    }

    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    /// Whether the generic fallback logs this report (anything above info, cancel excluded).
    pub fn is_loggable(&self) -> bool {
        matches!(self.severity, Severity::Warning | Severity::Error)
    }
}

impl From<&TaskError> for StatusReport {
    fn from(err: &TaskError) -> Self {
        match err {
            TaskError::Canceled => StatusReport::new(Severity::Cancel, err.to_string()),
            TaskError::Info { message } => StatusReport::new(Severity::Info, message.clone()),
            TaskError::Fail { .. } => StatusReport::error(err.to_string()),
        }
    }
}
