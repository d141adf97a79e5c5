//! # LogWriter: controller events rendered through `tracing`
//!
//! Queue deltas go out at `debug`, status and lifecycle events at `info`,
//! vetoes and subscriber trouble at `warn`/`error`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO toolvisor: status changed previous=StartedIdling status=StartedProcessing level=0
//! DEBUG toolvisor: task finished task="print(1)" task_id=7 outcome=FinishingOk
//! WARN toolvisor: quit vetoed reason="unsaved changes"
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::TaskAdded
            | EventKind::TaskRemoved
            | EventKind::TaskMovedIn
            | EventKind::TaskMovedOut
            | EventKind::TaskAbandoned => {
                tracing::debug!(kind = ?e.kind, task, task_id = ?e.task_id, position = ?e.position, "queue changed");
            }
            EventKind::TaskStarting => {
                tracing::debug!(task, task_id = ?e.task_id, lane = reason, "task starting");
            }
            EventKind::TaskFinished => {
                tracing::debug!(task, task_id = ?e.task_id, outcome = ?e.outcome, reason, "task finished");
            }
            EventKind::MarkerInserted | EventKind::MarkerRemoved => {
                tracing::debug!(kind = ?e.kind, level = ?e.level, "suspend marker");
            }
            EventKind::StatusChanged => {
                tracing::info!(previous = ?e.previous, status = ?e.status, level = ?e.level, detail = ?e.detail, "status changed");
            }
            EventKind::HotModeEntered => tracing::info!("hot mode entered"),
            EventKind::HotModeExited => tracing::info!("hot mode exited"),
            EventKind::SuspendRequested => {
                tracing::info!(level = ?e.level, detail = ?e.detail, "suspend requested");
            }
            EventKind::QuitScheduled => tracing::info!("quit scheduled"),
            EventKind::QuitVetoed => tracing::warn!(reason, "quit vetoed"),
            EventKind::QuitCanceled => tracing::info!("quit canceled"),
            EventKind::CancelRequested => tracing::info!(options = reason, "cancel requested"),
            EventKind::ToolTerminated => tracing::info!(exit_code = reason, "tool terminated"),
            EventKind::Custom => tracing::info!(task, reason, "custom event"),
            EventKind::SubscriberOverflow => {
                tracing::warn!(subscriber = task, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(subscriber = task, info = reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
