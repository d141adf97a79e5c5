//! # Controller status.
//!
//! ```text
//!              ┌────────────► StartedIdling ◄────────┐
//! Starting ────┤                   ▲                 │
//!              └────────────► StartedProcessing ◄────┤
//!                                  │                 │
//!                     ┌────────────┴──────────┐      │
//!                     ▼                       ▼      │
//!               StartedPaused         StartedSuspended
//!
//! any ───────────────────────────────────────► Terminated (no way out)
//! ```
//!
//! Listeners see every transition synchronously and in order, together with a
//! bag they may push extra [`Event`]s into; the bag is published after the last
//! listener returned.

use crate::events::Event;
use crate::policies::DebugDetail;
use crate::tasks::RunnableRef;

/// Externally visible state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ToolStatus {
    /// The tool is being started.
    #[default]
    Starting,
    /// Started, nothing to do.
    StartedIdling,
    /// Started, a task is running.
    StartedProcessing,
    /// Started, the queue is paused.
    StartedPaused,
    /// Started, serving a suspend level with nothing to do.
    StartedSuspended,
    /// Terminal.
    Terminated,
}

impl ToolStatus {
    pub fn is_started(self) -> bool {
        matches!(
            self,
            ToolStatus::StartedIdling
                | ToolStatus::StartedProcessing
                | ToolStatus::StartedPaused
                | ToolStatus::StartedSuspended
        )
    }

    /// Whether the lifecycle loop is parked (idle, paused or suspended).
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            ToolStatus::StartedIdling | ToolStatus::StartedPaused | ToolStatus::StartedSuspended
        )
    }

    pub fn as_label(self) -> &'static str {
        match self {
            ToolStatus::Starting => "starting",
            ToolStatus::StartedIdling => "idling",
            ToolStatus::StartedProcessing => "processing",
            ToolStatus::StartedPaused => "paused",
            ToolStatus::StartedSuspended => "suspended",
            ToolStatus::Terminated => "terminated",
        }
    }
}

/// One delivered status transition.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub previous: ToolStatus,
    pub status: ToolStatus,
    /// Entry running when the transition happened (processing transitions).
    pub runnable: Option<RunnableRef>,
    /// Suspend loop level at the time of the transition.
    pub level: u32,
    /// Current resume detail.
    pub detail: DebugDetail,
}

impl StatusChange {
    /// Re-entering `StartedProcessing` inside a suspend level: only the resume detail changed.
    pub fn is_same_status(&self) -> bool {
        self.previous == self.status
    }

    pub(crate) fn to_event(&self) -> Event {
        let mut ev = Event::new(crate::events::EventKind::StatusChanged)
            .with_status(self.previous, self.status)
            .with_level(self.level)
            .with_detail(self.detail);
        if let Some(r) = &self.runnable {
            ev = ev.with_task(r.label()).with_task_id(r.id());
        }
        ev
    }
}

/// Status transition subscriber.
///
/// Transitions are delivered in order, one at a time, by whichever thread is
/// dispatching the controller's notifications when the change is made. That is
/// usually the lifecycle loop, but may be a producer thread whose call released
/// the lock first. Never called with the controller lock held; must not block.
pub trait StatusListener: Send + Sync + 'static {
    fn status_changed(&self, change: &StatusChange, events: &mut Vec<Event>);
}

impl<F> StatusListener for F
where
    F: Fn(&StatusChange, &mut Vec<Event>) + Send + Sync + 'static,
{
    fn status_changed(&self, change: &StatusChange, events: &mut Vec<Event>) {
        self(change, events)
    }
}

/// Hot mode state as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HotTasksState {
    #[default]
    Inactive,
    /// Hot mode entered by the lifecycle loop itself.
    Active,
    /// Hot mode entered from inside a running task.
    Nested,
}
