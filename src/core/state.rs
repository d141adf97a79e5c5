//! Controller state guarded by the single controller mutex.
//!
//! Everything the lifecycle loop decides on lives here: the queue, the control
//! lane, the status, the current entry and the suspend levels. Methods are
//! lock-held helpers; none of them calls user code.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::core::{Progress, StatusChange, ToolStatus};
use crate::events::{Event, EventKind};
use crate::policies::DebugDetail;
use crate::queue::TaskQueue;
use crate::tasks::{RunnableRef, SubmitType, TaskRef};

pub(crate) struct State {
    pub(crate) queue: TaskQueue,
    /// Controller-internal runnables, always drained before the main lane.
    pub(crate) control: VecDeque<RunnableRef>,

    pub(crate) status: ToolStatus,
    pub(crate) status_previous: ToolStatus,
    /// `run` was entered.
    pub(crate) running: bool,
    pub(crate) terminated: bool,
    /// Producer calls in flight that hold the lifecycle loop (cancel, quit).
    pub(crate) internal_tasks: u32,

    pub(crate) current: Option<RunnableRef>,
    pub(crate) progress: Option<Progress>,
    pub(crate) submit_type: SubmitType,

    /// Level most recently requested.
    pub(crate) request_level: u32,
    /// Level of the innermost running suspended loop.
    pub(crate) run_level: u32,
    /// Floor of the innermost suspended loop (its caller's level).
    pub(crate) lower_level: u32,
    /// Level the consume loop currently serves.
    pub(crate) loop_level: u32,
    pub(crate) enter_detail: DebugDetail,
    pub(crate) exit_detail: DebugDetail,
    pub(crate) suspend_exit: Option<RunnableRef>,
    pub(crate) suspend_update_tasks: Vec<TaskRef>,
    pub(crate) post_controller: Option<RunnableRef>,

    pub(crate) hot_mode: bool,
    pub(crate) hot_nested: bool,
    pub(crate) hot_deferred: bool,

    /// A thread is delivering the outbox; others leave their deltas to it.
    pub(crate) dispatching: bool,
    pub(crate) exit_code: Option<i32>,
}

impl State {
    pub(crate) fn new() -> Self {
        Self {
            queue: TaskQueue::new(),
            control: VecDeque::new(),
            status: ToolStatus::Starting,
            status_previous: ToolStatus::Starting,
            running: false,
            terminated: false,
            internal_tasks: 0,
            current: None,
            progress: None,
            submit_type: SubmitType::Other,
            request_level: 0,
            run_level: 0,
            lower_level: 0,
            loop_level: 0,
            enter_detail: DebugDetail::Unspecified,
            exit_detail: DebugDetail::Unspecified,
            suspend_exit: None,
            suspend_update_tasks: Vec::new(),
            post_controller: None,
            hot_mode: false,
            hot_nested: true,
            hot_deferred: false,
            dispatching: false,
            exit_code: None,
        }
    }

    pub(crate) fn set_current(&mut self, runnable: Option<RunnableRef>) {
        if let Some(r) = &runnable {
            self.submit_type = r.submit_type();
        }
        self.current = runnable;
    }

    /// Moves the status machine; a same-status call only notifies for a
    /// processing re-entry inside a suspend level.
    pub(crate) fn change_status(&mut self, status: ToolStatus, progress: Option<Progress>) {
        if self.status == ToolStatus::Terminated {
            return;
        }
        let progress = match progress {
            Some(p) => Some(p),
            None if self.status != status => Some(Progress::new(status.as_label())),
            None => None,
        };
        if let Some(p) = progress {
            self.progress = Some(p);
        }

        if self.status == status {
            if status == ToolStatus::StartedProcessing && self.loop_level > 0 {
                let change = self.make_change(status, status);
                self.queue.push_status(change);
            }
            return;
        }

        if status == ToolStatus::StartedSuspended {
            self.exit_detail = DebugDetail::Unspecified;
        }
        if status == ToolStatus::StartedProcessing
            && (self.status != ToolStatus::StartedPaused
                || self.status_previous != ToolStatus::StartedProcessing)
        {
            self.queue.reset_idle(Instant::now());
        }

        let previous = self.status;
        self.status_previous = previous;
        self.status = status;
        let change = self.make_change(previous, status);
        self.queue.push_status(change);
    }

    fn make_change(&self, previous: ToolStatus, status: ToolStatus) -> StatusChange {
        StatusChange {
            previous,
            status,
            runnable: self.current.clone(),
            level: self.loop_level,
            detail: self.exit_detail,
        }
    }

    /// Records a suspend request. Returns the distance to the innermost running level.
    pub(crate) fn set_suspended(&mut self, level: u32, enter_detail: DebugDetail) -> i64 {
        self.request_level = level;
        self.enter_detail =
            if enter_detail == DebugDetail::Unspecified && self.exit_detail.is_step() {
                DebugDetail::StepEnd
            } else {
                enter_detail
            };
        i64::from(level) - i64::from(self.run_level)
    }

    /// Removes pending entries and forgets a removed suspend-exit command.
    pub(crate) fn remove_tasks(&mut self, runnables: &[RunnableRef]) -> Vec<RunnableRef> {
        let removed = self.queue.remove(runnables);
        self.forget_exit(&removed);
        removed
    }

    pub(crate) fn forget_exit(&mut self, removed: &[RunnableRef]) {
        let hit = match &self.suspend_exit {
            Some(exit) => removed.iter().any(|r| r.id() == exit.id()),
            None => false,
        };
        if hit {
            self.suspend_exit = None;
        }
    }

    /// Appends to the control lane unless already queued.
    pub(crate) fn schedule_control(&mut self, runnable: RunnableRef) {
        if !self.control.iter().any(|r| r.id() == runnable.id()) {
            self.control.push_back(runnable);
            self.queue.touch();
        }
    }

    /// Quit commands currently running or pending.
    pub(crate) fn quit_tasks(&self) -> Vec<RunnableRef> {
        let mut quit = Vec::new();
        if let Some(current) = self.current.as_ref().filter(|r| r.is_quit()) {
            quit.push(RunnableRef::clone(current));
        }
        quit.extend(self.queue.pending().into_iter().filter(|r| r.is_quit()));
        quit
    }

    /// Closes the queue; pending entries are abandoned and the control lane is dropped.
    pub(crate) fn abandon(&mut self) {
        let abandoned = self.queue.close();
        self.forget_exit(&abandoned);
        self.control.clear();
        self.post_controller = None;
    }

    pub(crate) fn emit(&mut self, ev: Event) {
        self.queue.emit(ev);
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.request_level > 0 || self.loop_level > 0
    }

    /// Logs structural damage; the lifecycle loop keeps going.
    pub(crate) fn check(&self) {
        if !self.queue.check() {
            tracing::error!(
                loop_level = self.loop_level,
                request_level = self.request_level,
                "task queue markers out of order"
            );
        }
    }

    pub(crate) fn suspend_requested_event(&self) -> Event {
        Event::new(EventKind::SuspendRequested)
            .with_level(self.request_level)
            .with_detail(self.enter_detail)
    }
}
