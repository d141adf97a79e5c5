//! # Events emitted by the controller and its task queue.
//!
//! The [`EventKind`] enum classifies event types across four groups:
//! - **Queue deltas**: structural changes of the task queue (added, removed, moved, started, finished)
//! - **Controller events**: status transitions, hot mode, suspend requests
//! - **Quit/cancel events**: quit scheduling, vetoes and cancellation requests
//! - **Subscriber events**: overflow and panic of event subscribers
//!
//! The [`Event`] struct carries metadata such as the task label and id, the queue
//! position, the old/new status and suspend levels.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Deltas produced in one locked section of the queue are published together, in order.
//!
//! ## Example
//! ```rust
//! use toolvisor::{Event, EventKind, ToolStatus};
//!
//! let ev = Event::new(EventKind::StatusChanged)
//!     .with_status(ToolStatus::StartedIdling, ToolStatus::StartedProcessing)
//!     .with_task("print(1)");
//!
//! assert_eq!(ev.kind, EventKind::StatusChanged);
//! assert_eq!(ev.status, Some(ToolStatus::StartedProcessing));
//! assert_eq!(ev.task.as_deref(), Some("print(1)"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::core::ToolStatus;
use crate::policies::DebugDetail;
use crate::tasks::{RunnableRef, TaskEvent};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of controller events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `task`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `task`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Queue deltas ===
    /// Task appended to (or inserted into) the main lane.
    ///
    /// Sets:
    /// - `task`, `task_id`: the task
    /// - `position`: index in the main lane after insertion
    TaskAdded,

    /// Pending task removed from the queue before it ran.
    ///
    /// Sets:
    /// - `task`, `task_id`: the task
    /// - `position`: index it was removed from
    TaskRemoved,

    /// Task moved into this queue from another controller.
    TaskMovedIn,

    /// Task moved out of this queue to another controller.
    TaskMovedOut,

    /// Task taken from a lane and about to run.
    ///
    /// Sets:
    /// - `task`, `task_id`: the task
    /// - `reason`: lane (`"main"`, `"idle"`, `"hot"`, `"control"`)
    TaskStarting,

    /// Task finished.
    ///
    /// Sets:
    /// - `task`, `task_id`: the task
    /// - `outcome`: `FinishingOk`, `FinishingCancel` or `FinishingError`
    /// - `reason`: error message for failures
    TaskFinished,

    /// Pending task dropped because the controller terminated.
    TaskAbandoned,

    /// Suspend level marker placed at the front of the main lane.
    ///
    /// Sets:
    /// - `level`: the suspend level the marker stands for
    MarkerInserted,

    /// Suspend level marker removed from the main lane.
    MarkerRemoved,

    // === Controller events ===
    /// Controller status changed (or, inside a suspend level, the resume detail changed).
    ///
    /// Sets:
    /// - `previous`, `status`: old and new status
    /// - `detail`: current resume detail
    /// - `level`: current suspend loop level
    StatusChanged,

    /// Hot mode entered on the lifecycle loop.
    HotModeEntered,

    /// Hot mode left; the previous submit category is restored.
    HotModeExited,

    /// A suspend level was requested.
    ///
    /// Sets:
    /// - `level`: requested level
    /// - `detail`: enter detail
    SuspendRequested,

    // === Quit / cancel events ===
    /// Quit task queued.
    QuitScheduled,

    /// The schedule-quit handler vetoed the quit.
    ///
    /// Sets:
    /// - `reason`: message of the handler's status report
    QuitVetoed,

    /// Queued or running quit tasks were cancelled.
    QuitCanceled,

    /// `cancel_task` was called.
    ///
    /// Sets:
    /// - `reason`: the cancel options
    CancelRequested,

    /// The tool terminated and the lifecycle loop ended.
    ///
    /// Sets:
    /// - `reason`: exit code
    ToolTerminated,

    /// Domain event contributed by a status listener.
    ///
    /// Sets:
    /// - `reason`: listener-defined payload
    Custom,
}

/// Controller event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Label of the task, if applicable.
    pub task: Option<Arc<str>>,
    /// Identity of the task, if applicable.
    pub task_id: Option<u64>,
    /// Position in the main lane for queue deltas.
    pub position: Option<u32>,
    /// New status for status events.
    pub status: Option<ToolStatus>,
    /// Previous status for status events.
    pub previous: Option<ToolStatus>,
    /// Suspend level.
    pub level: Option<u32>,
    /// Debug detail (resume or enter detail).
    pub detail: Option<DebugDetail>,
    /// Finishing outcome for `TaskFinished`.
    pub outcome: Option<TaskEvent>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            task_id: None,
            position: None,
            status: None,
            previous: None,
            level: None,
            detail: None,
            outcome: None,
            reason: None,
        }
    }

    /// Creates an event describing `runnable` (label and id).
    pub fn for_runnable(kind: EventKind, runnable: &RunnableRef) -> Self {
        Event::new(kind)
            .with_task(runnable.label())
            .with_task_id(runnable.id())
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a task label.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a task id.
    #[inline]
    pub fn with_task_id(mut self, id: u64) -> Self {
        self.task_id = Some(id);
        self
    }

    /// Attaches a queue position (saturated to `u32::MAX`).
    #[inline]
    pub fn with_position(mut self, position: usize) -> Self {
        self.position = Some(u32::try_from(position).unwrap_or(u32::MAX));
        self
    }

    /// Attaches the old and new status.
    #[inline]
    pub fn with_status(mut self, previous: ToolStatus, status: ToolStatus) -> Self {
        self.previous = Some(previous);
        self.status = Some(status);
        self
    }

    /// Attaches a suspend level.
    #[inline]
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    /// Attaches a debug detail.
    #[inline]
    pub fn with_detail(mut self, detail: DebugDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Attaches a finishing outcome.
    #[inline]
    pub fn with_outcome(mut self, outcome: TaskEvent) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }

    /// Whether this event is a structural queue delta.
    #[inline]
    pub fn is_queue_delta(&self) -> bool {
        matches!(
            self.kind,
            EventKind::TaskAdded
                | EventKind::TaskRemoved
                | EventKind::TaskMovedIn
                | EventKind::TaskMovedOut
                | EventKind::TaskStarting
                | EventKind::TaskFinished
                | EventKind::TaskAbandoned
                | EventKind::MarkerInserted
                | EventKind::MarkerRemoved
        )
    }
}
