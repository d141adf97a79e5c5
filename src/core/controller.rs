//! # Controller: the producer-facing handle of one tool session.
//!
//! A [`Controller`] owns the task queue, the status machine and the suspend
//! bookkeeping of one tool. Producers (UI, views, other controllers) call into it
//! from any thread; exactly one lifecycle loop ([`Controller::run`]) executes tasks.
//!
//! ## Architecture
//! ```text
//! producers ── submit / cancel / quit / pause ──┐
//!                                                ▼
//!                               ┌──── Mutex<State> ─────┐
//!                               │ queue (main + hot)    │
//!                               │ control lane          │
//!                               │ status, levels        │──► outbox (deltas, status changes)
//!                               └───────────┬───────────┘        │
//!                                           │ Notify             ▼ after unlock
//!                                           ▼              task.changed(...)
//!                                    lifecycle loop        status listeners + bag
//!                                           │              Bus ──► SubscriberSet
//!                                           ▼
//!                                  Task::run(&ToolService, &Progress)
//! ```
//!
//! ## Rules
//! - Every mutation happens inside [`with_state`](Controller::with_state); nothing awaits with the lock held.
//! - Deltas produced under the lock are delivered after it is released, in production order,
//!   by exactly one thread at a time.
//! - Status listeners and `Task::changed` never run under the lock; panics in them are caught and logged.
//! - The change stamp is bumped once per delivered batch.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, broadcast, watch};

use crate::core::builder::ControllerBuilder;
use crate::core::handlers::{CommandArgs, CommandHandler, REPORT_STATUS};
use crate::core::state::State;
use crate::core::tool::ToolBackend;
use crate::core::{ControllerConfig, HotTasksState, Progress, StatusChange, StatusListener, ToolStatus};
use crate::error::{Severity, StatusReport, SubmitError};
use crate::events::{Bus, Event};
use crate::policies::{DebugDetail, ResumeDetailPolicy};
use crate::queue::Outgoing;
use crate::subscribers::Subscribe;
use crate::tasks::{ResumeCommand, Runnable, RunnableKind, RunnableRef, SubmitType, TaskEvent, TaskRef};

static NEXT_CONTROLLER: AtomicU64 = AtomicU64::new(1);

pub(crate) struct Shared {
    pub(super) id: u64,
    pub(super) cfg: ControllerConfig,
    pub(super) state: Mutex<State>,
    pub(super) wake: Notify,
    pub(super) status_tx: watch::Sender<ToolStatus>,
    pub(super) listeners: RwLock<Vec<Arc<dyn StatusListener>>>,
    pub(super) handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
    pub(super) backend: Arc<dyn ToolBackend>,
    pub(super) bus: Bus,
    /// Handed to the subscriber listener when `run` starts.
    pub(super) subscribers: Mutex<Vec<Arc<dyn Subscribe>>>,
    pub(super) resume_policy: Arc<dyn ResumeDetailPolicy>,
    pub(super) change_stamp: AtomicU64,
    pub(super) task_counter: AtomicU64,
}

/// Handle to one tool session. Cheap to clone.
#[derive(Clone)]
pub struct Controller {
    pub(super) inner: Arc<Shared>,
}

impl Controller {
    /// Starts building a controller around `backend`.
    pub fn builder(backend: Arc<dyn ToolBackend>) -> ControllerBuilder {
        ControllerBuilder::new(backend)
    }

    pub(crate) fn new_internal(
        cfg: ControllerConfig,
        backend: Arc<dyn ToolBackend>,
        subscribers: Vec<Arc<dyn Subscribe>>,
        listeners: Vec<Arc<dyn StatusListener>>,
        handlers: HashMap<String, Arc<dyn CommandHandler>>,
        resume_policy: Arc<dyn ResumeDetailPolicy>,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let (status_tx, _) = watch::channel(ToolStatus::Starting);
        let mut state = State::new();
        state.set_current(Some(Runnable::new(RunnableKind::Start)));

        Self {
            inner: Arc::new(Shared {
                id: NEXT_CONTROLLER.fetch_add(1, Ordering::Relaxed),
                cfg,
                state: Mutex::new(state),
                wake: Notify::new(),
                status_tx,
                listeners: RwLock::new(listeners),
                handlers: RwLock::new(handlers),
                backend,
                bus,
                subscribers: Mutex::new(subscribers),
                resume_policy,
                change_stamp: AtomicU64::new(0),
                task_counter: AtomicU64::new(0),
            }),
        }
    }

    // ---- lock discipline ----

    /// Runs `f` under the controller lock, then delivers what it produced.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let (out, batch, touched) = {
            let mut st = self.inner.state.lock();
            let out = f(&mut st);
            let touched = st.queue.take_touched();
            (out, Self::claim_outbox(&mut st), touched)
        };
        if touched {
            self.inner.change_stamp.fetch_add(1, Ordering::AcqRel);
        }
        if let Some(batch) = batch {
            self.drain(batch);
        }
        out
    }

    fn claim_outbox(st: &mut State) -> Option<Vec<Outgoing>> {
        if st.dispatching {
            return None;
        }
        let batch = st.queue.take_outbox();
        if batch.is_empty() {
            return None;
        }
        st.dispatching = true;
        Some(batch)
    }

    /// Delivers batches until the outbox stays empty; deltas added meanwhile by
    /// other threads are delivered here too, keeping the global order.
    fn drain(&self, mut batch: Vec<Outgoing>) {
        loop {
            self.inner.change_stamp.fetch_add(1, Ordering::AcqRel);
            for item in batch {
                self.deliver(item);
            }
            let mut st = self.inner.state.lock();
            batch = st.queue.take_outbox();
            if batch.is_empty() {
                st.dispatching = false;
                return;
            }
        }
    }

    fn deliver(&self, item: Outgoing) {
        match item {
            Outgoing::Event(ev) => self.inner.bus.publish(ev),
            Outgoing::Notice(runnable, event) => {
                let res = std::panic::catch_unwind(AssertUnwindSafe(|| runnable.changed(event)));
                if res.is_err() {
                    tracing::error!(task = %runnable.label(), ?event, "task lifecycle callback panicked");
                }
            }
            Outgoing::Status(change) => self.deliver_status(change),
        }
    }

    fn deliver_status(&self, change: StatusChange) {
        self.inner.bus.publish(change.to_event());

        let listeners: Vec<Arc<dyn StatusListener>> = self.inner.listeners.read().clone();
        let mut bag = Vec::new();
        for l in &listeners {
            let res = std::panic::catch_unwind(AssertUnwindSafe(|| l.status_changed(&change, &mut bag)));
            if res.is_err() {
                tracing::error!(status = ?change.status, "status listener panicked");
            }
        }
        self.inner.bus.publish_all(bag);

        if !change.is_same_status() {
            self.inner.status_tx.send_replace(change.status);
        }
    }

    /// Wakes the lifecycle loop (a permit is stored if it is not parked yet).
    pub(crate) fn wake(&self) {
        self.inner.wake.notify_one();
    }

    pub(crate) fn backend(&self) -> &Arc<dyn ToolBackend> {
        &self.inner.backend
    }

    // ---- queries ----

    /// Label of the tool (from the configuration).
    pub fn name(&self) -> &str {
        &self.inner.cfg.name
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.cfg
    }

    pub fn status(&self) -> ToolStatus {
        self.inner.state.lock().status
    }

    /// Entry the lifecycle loop is executing (or the start entry while starting).
    pub fn current_runnable(&self) -> Option<RunnableRef> {
        self.inner.state.lock().current.clone()
    }

    /// Submit category of the current entry; `Other` while hot tasks run.
    pub fn current_submit_type(&self) -> SubmitType {
        self.inner.state.lock().submit_type
    }

    /// Progress tracker of the current entry.
    pub fn progress_info(&self) -> Option<Progress> {
        self.inner.state.lock().progress.clone()
    }

    /// Version counter bumped on every delivered state change.
    pub fn change_stamp(&self) -> u64 {
        self.inner.change_stamp.load(Ordering::Acquire)
    }

    /// Number of main-lane entries started so far.
    pub fn task_counter(&self) -> u64 {
        self.inner.task_counter.load(Ordering::Acquire)
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.state.lock().is_suspended()
    }

    /// Suspend level currently served (0 outside any suspend).
    pub fn suspend_level(&self) -> u32 {
        self.inner.state.lock().loop_level
    }

    pub fn suspend_enter_detail(&self) -> DebugDetail {
        self.inner.state.lock().enter_detail
    }

    pub fn suspend_exit_detail(&self) -> DebugDetail {
        self.inner.state.lock().exit_detail
    }

    pub fn hot_tasks_state(&self) -> HotTasksState {
        let st = self.inner.state.lock();
        match (st.hot_mode, st.hot_nested) {
            (false, _) => HotTasksState::Inactive,
            (true, false) => HotTasksState::Active,
            (true, true) => HotTasksState::Nested,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().queue.is_paused()
    }

    /// Pending main-lane entries in execution order (markers excluded).
    pub fn pending_tasks(&self) -> Vec<RunnableRef> {
        self.inner.state.lock().queue.pending()
    }

    /// Whole main lane including suspend markers, front first.
    pub fn queue_snapshot(&self) -> Vec<RunnableRef> {
        self.inner.state.lock().queue.snapshot()
    }

    /// Exit code returned by the backend once the tool terminated.
    pub fn exit_code(&self) -> Option<i32> {
        self.inner.state.lock().exit_code
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.inner.state.lock().terminated
    }

    /// Subscribes to the event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe()
    }

    /// Resolves once the published status satisfies `pred` and returns it.
    pub async fn wait_for_status(&self, pred: impl Fn(ToolStatus) -> bool) -> ToolStatus {
        let mut rx = self.inner.status_tx.subscribe();
        let res = rx.wait_for(|s| pred(*s)).await.map(|s| *s);
        match res {
            Ok(s) => s,
            Err(_) => *rx.borrow(),
        }
    }

    // ---- producers ----

    /// Appends a task to the main lane.
    pub fn submit(&self, task: TaskRef) -> Result<RunnableRef, SubmitError> {
        let runnable = Runnable::from_task(task);
        self.submit_runnables(vec![RunnableRef::clone(&runnable)])?;
        Ok(runnable)
    }

    /// Appends tasks to the main lane in order; nothing is added if the queue is closed.
    pub fn submit_all(&self, tasks: Vec<TaskRef>) -> Result<Vec<RunnableRef>, SubmitError> {
        let runnables: Vec<RunnableRef> = tasks.into_iter().map(Runnable::from_task).collect();
        self.submit_runnables(runnables.clone())?;
        Ok(runnables)
    }

    /// Submits one line of console input.
    pub fn submit_text(&self, text: &str, submit_type: SubmitType) -> Result<RunnableRef, SubmitError> {
        let runnable = Runnable::console(text, submit_type);
        self.submit_runnables(vec![RunnableRef::clone(&runnable)])?;
        Ok(runnable)
    }

    /// Submits several lines of console input, one entry per line.
    ///
    /// Returns [`SubmitError::Canceled`] without enqueueing anything if `progress`
    /// is already cancelled.
    pub fn submit_lines(
        &self,
        lines: &[&str],
        submit_type: SubmitType,
        progress: Option<&Progress>,
    ) -> Result<Vec<RunnableRef>, SubmitError> {
        let runnables: Vec<RunnableRef> = lines
            .iter()
            .map(|line| Runnable::console(line, submit_type))
            .collect();
        if progress.is_some_and(Progress::is_canceled) {
            return Err(SubmitError::Canceled);
        }
        self.submit_runnables(runnables.clone())?;
        Ok(runnables)
    }

    pub(crate) fn submit_runnables(&self, runnables: Vec<RunnableRef>) -> Result<(), SubmitError> {
        self.with_state(|st| {
            if st.queue.is_closed() {
                return Err(SubmitError::Closed);
            }
            for r in runnables {
                st.queue.add(r)?;
            }
            Ok(())
        })?;
        self.wake();
        Ok(())
    }

    /// Adds a hot task and asks the tool to enter hot mode.
    pub fn submit_hot(&self, task: TaskRef) -> Result<RunnableRef, SubmitError> {
        let runnable = Runnable::from_task(task);
        self.with_state(|st| st.queue.add_hot(RunnableRef::clone(&runnable)))?;
        self.schedule_hot_mode();
        self.wake();
        Ok(runnable)
    }

    /// Registers a task that runs once whenever the tool was idle for `timeout`.
    pub fn submit_on_idle(&self, task: TaskRef, timeout: std::time::Duration) -> RunnableRef {
        let runnable = Runnable::from_task(task);
        self.with_state(|st| st.queue.add_on_idle(RunnableRef::clone(&runnable), timeout));
        self.wake();
        runnable
    }

    pub fn remove_on_idle(&self, runnable: &RunnableRef) {
        self.with_state(|st| st.queue.remove_on_idle(runnable));
    }

    /// Removes pending entries; unknown entries are ignored. Returns the entries removed.
    pub fn remove(&self, runnables: &[RunnableRef]) -> Vec<RunnableRef> {
        let removed = self.with_state(|st| st.remove_tasks(runnables));
        self.wake();
        removed
    }

    /// Moves pending entries to another controller.
    ///
    /// Every entry is asked with [`TaskEvent::MovingFrom`] first; entries that veto
    /// stay. Returns the entries actually moved.
    pub fn move_tasks_to(&self, runnables: &[RunnableRef], target: &Controller) -> Vec<RunnableRef> {
        if Arc::ptr_eq(&self.inner, &target.inner) {
            return Vec::new();
        }
        let pending: Vec<RunnableRef> = self.with_state(|st| {
            runnables
                .iter()
                .filter(|r| !r.is_marker() && st.queue.contains(r))
                .cloned()
                .collect()
        });
        let movable: Vec<RunnableRef> = pending
            .into_iter()
            .filter(|r| r.changed(TaskEvent::MovingFrom))
            .collect();
        if movable.is_empty() {
            return movable;
        }

        let taken = self.with_state(|st| {
            let taken = st.queue.take_for_move(&movable);
            st.forget_exit(&taken);
            taken
        });
        let mut moved = Vec::with_capacity(taken.len());
        for r in taken {
            match target.with_state(|st| st.queue.add_moved(RunnableRef::clone(&r))) {
                Ok(_) => moved.push(r),
                Err(err) => {
                    tracing::warn!(task = %r.label(), target = %target.name(), error = %err, "task could not be moved");
                    r.changed(TaskEvent::BeingAbandoned);
                }
            }
        }
        self.wake();
        target.wake();
        moved
    }

    /// Pauses (or resumes) the main lane. Returns whether the pause state changed.
    pub fn pause(&self, pause: bool) -> bool {
        let changed = self.with_state(|st| {
            if st.terminated || st.queue.is_paused() == pause {
                return false;
            }
            if pause {
                st.queue.pause();
            } else {
                st.queue.resume();
            }
            true
        });
        if changed {
            self.wake();
        }
        changed
    }

    // ---- control lane ----

    /// Queues a task on the control lane; it runs before any main-lane task.
    pub fn schedule_controller_runnable(&self, task: TaskRef) -> RunnableRef {
        let runnable = Runnable::from_task(task);
        self.with_state(|st| st.schedule_control(RunnableRef::clone(&runnable)));
        self.wake();
        runnable
    }

    /// Registers a task re-queued on the control lane after every main-lane task.
    pub fn add_post_controller_runnable(&self, task: TaskRef) -> RunnableRef {
        let runnable = Runnable::from_task(task);
        self.with_state(|st| {
            st.post_controller = Some(RunnableRef::clone(&runnable));
            st.queue.touch();
        });
        runnable
    }

    pub fn remove_post_controller_runnable(&self, runnable: &RunnableRef) {
        self.with_state(|st| {
            if st.post_controller.as_ref().is_some_and(|r| r.id() == runnable.id()) {
                st.post_controller = None;
                st.queue.touch();
            }
            st.control.retain(|r| r.id() != runnable.id());
        });
    }

    /// Adds a task run by the debug-context updater at the outermost suspend level.
    pub fn add_suspend_update_runnable(&self, task: TaskRef) {
        self.with_state(|st| {
            st.suspend_update_tasks.push(task);
            st.queue.touch();
        });
    }

    // ---- suspend requests ----

    /// Records a suspend request at `level` and wakes the lifecycle loop.
    pub fn request_suspend(&self, level: u32, detail: DebugDetail) {
        self.with_state(|st| {
            st.set_suspended(level, detail);
            let ev = st.suspend_requested_event();
            st.emit(ev);
        });
        self.wake();
    }

    /// Schedules the command that leaves the current suspend level, replacing any
    /// pending one. Returns `false` when no suspend level is served.
    pub fn schedule_suspend_exit(&self, command: ResumeCommand) -> bool {
        let on_lifecycle = self.is_on_lifecycle();
        let runnable = Runnable::new(RunnableKind::Resume(command));
        let scheduled = self.with_state(|st| {
            if st.loop_level == 0 {
                return false;
            }
            if let Some(old) = st.suspend_exit.take() {
                st.queue.remove(std::slice::from_ref(&old));
                st.control.retain(|r| r.id() != old.id());
            }
            st.suspend_exit = Some(RunnableRef::clone(&runnable));
            if on_lifecycle && command != ResumeCommand::Quit {
                let lower = st.lower_level;
                st.set_suspended(lower, DebugDetail::Unspecified);
            } else {
                st.schedule_control(RunnableRef::clone(&runnable));
            }
            true
        });
        if scheduled {
            self.wake();
        }
        scheduled
    }

    // ---- listeners and handlers ----

    pub fn add_status_listener(&self, listener: Arc<dyn StatusListener>) {
        self.inner.listeners.write().push(listener);
    }

    pub fn remove_status_listener(&self, listener: &Arc<dyn StatusListener>) {
        self.inner
            .listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Registers `handler` for `id`, replacing any previous one.
    pub fn add_command_handler(&self, id: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        self.inner.handlers.write().insert(id.into(), handler);
    }

    pub fn command_handler(&self, id: &str) -> Option<Arc<dyn CommandHandler>> {
        self.inner.handlers.read().get(id).cloned()
    }

    pub fn remove_command_handler(&self, id: &str) -> Option<Arc<dyn CommandHandler>> {
        self.inner.handlers.write().remove(id)
    }

    /// Runs the handler registered for `id`. A missing handler or a handler error yields `None`.
    pub async fn execute_command(
        &self,
        id: &str,
        args: CommandArgs,
        progress: &Progress,
    ) -> Option<StatusReport> {
        let handler = self.command_handler(id)?;
        match handler.execute(id, self, &args, progress).await {
            Ok(report) => Some(report),
            Err(err) => {
                tracing::warn!(tool = %self.name(), handler = id, error = %err, "command handler failed");
                None
            }
        }
    }

    /// Single gate for reports: the report-status handler may consume them, the rest is logged.
    pub async fn handle_status(&self, report: StatusReport, progress: &Progress) {
        if report.is_ok() {
            return;
        }
        let consumed = self
            .execute_command(REPORT_STATUS, CommandArgs::Status(report.clone()), progress)
            .await
            .is_some_and(|r| r.is_ok());
        if consumed || !report.is_loggable() {
            return;
        }
        match report.severity {
            Severity::Error => {
                tracing::error!(tool = %self.name(), message = %report.message, "tool reported an error")
            }
            _ => {
                tracing::warn!(tool = %self.name(), message = %report.message, "tool reported a warning")
            }
        }
    }

    // ---- change stamp ----

    /// Announces a change made outside the queue (e.g. by a quit command).
    pub fn brief_about_to_change(&self) {
        self.inner.change_stamp.fetch_add(1, Ordering::AcqRel);
    }

    pub fn brief_changed(&self) {
        self.inner.change_stamp.fetch_add(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
