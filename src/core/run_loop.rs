//! # Lifecycle loop.
//!
//! [`Controller::run`] owns the single lifecycle task: it starts the tool, then
//! repeatedly picks the next entry (control lane, hot lane, main lane) and runs
//! it, parking on the controller's `Notify` when there is nothing to do.
//!
//! ```text
//! run()
//!  ├─ subscriber listener: Bus ──► SubscriberSet (until run returns)
//!  ├─ backend.start()          Err ─► Terminated, abandon, Err(Startup)
//!  ├─ lifecycle_loop()
//!  │    ├─ loop_run_task(): control ─► hot ─► main/idle (one at a time)
//!  │    └─ decide: exit | continue | suspend | park(Paused | Idling)
//!  └─ backend.finish() ─► exit code, Terminated, abandon
//! ```
//!
//! ## Rules
//! - Decisions are taken under the lock; tasks run with the lock released.
//! - A failing task never stops the loop; only termination does. After any failure
//!   the backend's liveness is checked and a dead tool marks the controller terminated.
//! - Control-lane entries preempt the main lane; the hot lane never changes the status.

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::tool::ToolService;
use crate::core::{Controller, Progress, ToolStatus};
use crate::error::{ControllerError, StatusReport, TaskError};
use crate::events::{Event, EventKind};
use crate::policies::DebugDetail;
use crate::queue::NextRunnable;
use crate::subscribers::SubscriberSet;
use crate::tasks::{ResumeCommand, RunnableKind, RunnableRef, TaskEvent};

tokio::task_local! {
    /// Id of the controller whose lifecycle loop runs on the current task.
    static LIFECYCLE: u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Control,
    Default,
    Other,
}

enum Picked {
    Run {
        lane: Lane,
        runnable: RunnableRef,
        saved: Option<RunnableRef>,
        progress: Progress,
    },
    Hot,
    /// Console input refused inside a suspend level.
    Refused,
}

pub(super) enum Park {
    Exit,
    Continue,
    Suspend,
    Wait(Option<Instant>),
}

/// Maps a task result onto its finishing event and log reason.
pub(super) fn outcome(res: &Result<(), TaskError>) -> (TaskEvent, Option<String>) {
    match res {
        Ok(()) => (TaskEvent::FinishingOk, None),
        Err(err) if err.is_silent() => (TaskEvent::FinishingCancel, Some(err.to_string())),
        Err(err) => (TaskEvent::FinishingError, Some(err.to_string())),
    }
}

impl Controller {
    /// Whether the caller runs on this controller's lifecycle loop.
    pub(crate) fn is_on_lifecycle(&self) -> bool {
        LIFECYCLE
            .try_with(|id| *id == self.inner.id)
            .unwrap_or(false)
    }

    /// Starts the tool and runs the lifecycle loop until the tool terminates.
    ///
    /// Returns the exit code reported by the backend. Fails with
    /// [`ControllerError::Startup`] if the tool cannot be started and with
    /// [`ControllerError::AlreadyStarted`] on a second call.
    pub async fn run(&self) -> Result<i32, ControllerError> {
        let first = self.with_state(|st| !std::mem::replace(&mut st.running, true));
        if !first {
            return Err(ControllerError::AlreadyStarted);
        }

        let token = CancellationToken::new();
        let listener = self.subscriber_listener(token.clone());
        let service = ToolService::new(self.clone());

        let res = LIFECYCLE.scope(self.inner.id, self.lifecycle(&service)).await;

        token.cancel();
        if let Some(handle) = listener {
            let _ = handle.await;
        }
        res
    }

    /// Subscribes to the bus and forwards events to the subscriber set until `token` fires.
    fn subscriber_listener(&self, token: CancellationToken) -> Option<JoinHandle<()>> {
        let subs = std::mem::take(&mut *self.inner.subscribers.lock());
        if subs.is_empty() {
            return None;
        }
        let mut rx = self.inner.bus.subscribe();
        let bus = self.inner.bus.clone();

        Some(tokio::spawn(async move {
            use tokio::sync::broadcast::error::{RecvError, TryRecvError};

            let set = SubscriberSet::new(subs, bus);
            loop {
                tokio::select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "subscriber listener lagged behind the bus");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = token.cancelled() => {
                        loop {
                            match rx.try_recv() {
                                Ok(ev) => set.emit(&ev),
                                Err(TryRecvError::Lagged(_)) => continue,
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
            set.shutdown().await;
        }))
    }

    async fn lifecycle(&self, service: &ToolService) -> Result<i32, ControllerError> {
        let progress = Progress::new("Start");
        self.with_state(|st| {
            st.progress = Some(progress.clone());
            st.queue.reset_idle(Instant::now());
        });

        tracing::info!(tool = %self.name(), "starting tool");
        let started = self.inner.backend.start(service, &progress).await;
        progress.done();
        if let Err(err) = started {
            tracing::error!(tool = %self.name(), error = %err, "tool startup failed");
            self.terminate(err.to_string());
            return Err(err);
        }

        let deferred = self.with_state(|st| {
            st.set_current(None);
            let pending = st.terminated
                || !st.control.is_empty()
                || matches!(
                    st.queue.next_runnable(Instant::now()),
                    NextRunnable::Default | NextRunnable::Other
                );
            if !pending {
                st.change_status(ToolStatus::StartedIdling, None);
            }
            std::mem::take(&mut st.hot_deferred)
        });
        if deferred {
            self.schedule_hot_mode();
        }

        self.lifecycle_loop(service).await;

        let code = self.inner.backend.finish(service).await;
        self.with_state(|st| st.exit_code = Some(code));
        self.terminate(format!("exit code {code}"));
        tracing::info!(tool = %self.name(), code, "tool terminated");
        Ok(code)
    }

    /// Final transition: Terminated, queue closed, pending entries abandoned.
    fn terminate(&self, reason: String) {
        self.with_state(|st| {
            st.terminated = true;
            st.set_current(None);
            st.change_status(ToolStatus::Terminated, None);
            st.abandon();
            st.emit(Event::new(EventKind::ToolTerminated).with_reason(reason));
        });
        self.wake();
    }

    async fn lifecycle_loop(&self, service: &ToolService) {
        let mut enter_suspended = false;
        loop {
            if enter_suspended {
                enter_suspended = false;
                self.run_suspended_loop(service).await;
            } else {
                self.loop_run_task(service).await;
            }

            let park = self.with_state(|st| {
                st.check();
                if st.internal_tasks > 0 {
                    return Park::Wait(None);
                }
                if st.terminated {
                    return Park::Exit;
                }
                if !st.control.is_empty() {
                    return Park::Continue;
                }
                if st.request_level > 0 {
                    return Park::Suspend;
                }
                if st.queue.next_runnable(Instant::now()) != NextRunnable::None {
                    return Park::Continue;
                }
                if st.queue.is_paused() {
                    st.change_status(ToolStatus::StartedPaused, None);
                    return Park::Wait(None);
                }
                st.change_status(ToolStatus::StartedIdling, None);
                Park::Wait(st.queue.next_idle_deadline())
            });

            match park {
                Park::Exit => return,
                Park::Continue => {}
                Park::Suspend => enter_suspended = true,
                Park::Wait(deadline) => self.park(deadline).await,
            }
        }
    }

    /// Parks the lifecycle loop until woken or until `deadline`.
    pub(super) async fn park(&self, deadline: Option<Instant>) {
        match deadline {
            Some(at) => {
                let _ = tokio::time::timeout_at(at, self.inner.wake.notified()).await;
            }
            None => self.inner.wake.notified().await,
        }
    }

    /// Runs entries until none is runnable at the current level.
    pub(super) async fn loop_run_task(&self, service: &ToolService) {
        loop {
            let Some(picked) = self.with_state(|st| self.pick(st)) else {
                return;
            };
            let (lane, runnable, saved, progress) = match picked {
                Picked::Refused => return,
                Picked::Hot => {
                    self.with_state(|st| st.hot_nested = false);
                    let ok = self.inner.backend.initialize_hot_mode(service).await;
                    if !ok && !self.inner.backend.is_alive() {
                        self.mark_as_terminated();
                    }
                    self.with_state(|st| st.hot_nested = true);
                    continue;
                }
                Picked::Run {
                    lane,
                    runnable,
                    saved,
                    progress,
                } => (lane, runnable, saved, progress),
            };

            if lane == Lane::Control {
                let res = self.run_runnable(service, &runnable, &progress).await;
                let (event, reason) = outcome(&res);
                if event == TaskEvent::FinishingError {
                    tracing::error!(
                        tool = %self.name(),
                        task = %runnable.label(),
                        error = reason.as_deref().unwrap_or_default(),
                        "internal controller task failed"
                    );
                }
                self.with_state(|st| {
                    st.queue.finished(&runnable, event, reason.as_deref());
                    st.set_current(saved);
                });
                progress.done();
                if res.is_ok() {
                    continue;
                }
                if !self.inner.backend.is_alive() {
                    self.mark_as_terminated();
                }
                return;
            }

            self.inner
                .task_counter
                .fetch_add(1, std::sync::atomic::Ordering::AcqRel);
            let res = self.run_runnable(service, &runnable, &progress).await;
            let (event, reason) = outcome(&res);
            self.with_state(|st| st.queue.finished(&runnable, event, reason.as_deref()));

            if let Err(err) = &res {
                if !err.is_silent() {
                    let message = format!("{}: running '{}' failed: {err}", self.name(), runnable.label());
                    if lane == Lane::Default {
                        self.handle_status(StatusReport::error(message), &progress).await;
                    } else {
                        tracing::error!(tool = %self.name(), task = %runnable.label(), error = %err, "task failed");
                    }
                }
            }

            self.with_state(|st| {
                if let Some(post) = st.post_controller.clone() {
                    st.control.retain(|r| r.id() != post.id());
                    st.control.push_back(post);
                }
                st.set_current(saved);
            });
            progress.done();

            if res.is_ok() {
                continue;
            }
            if !self.inner.backend.is_alive() {
                self.mark_as_terminated();
            }
            return;
        }
    }

    /// Takes the next entry under the lock and moves the status to processing.
    fn pick(&self, st: &mut crate::core::state::State) -> Option<Picked> {
        let saved = st.current.clone();
        let saved_submit_type = st.submit_type;
        let (lane, runnable) = match st.control.pop_front() {
            Some(r) => {
                st.queue.starting_control(&r);
                (Lane::Control, r)
            }
            None => {
                if st.loop_level != st.request_level || st.terminated || st.internal_tasks > 0 {
                    return None;
                }
                let now = Instant::now();
                match st.queue.next_runnable(now) {
                    NextRunnable::Hot => return Some(Picked::Hot),
                    NextRunnable::Default => (Lane::Default, st.queue.poll(now)?),
                    NextRunnable::Other => (Lane::Other, st.queue.poll(now)?),
                    NextRunnable::None => return None,
                }
            }
        };
        st.set_current(Some(RunnableRef::clone(&runnable)));

        if st.loop_level > 0 {
            if let (Lane::Default | Lane::Other, RunnableKind::Console { text, .. }) = (lane, runnable.kind()) {
                if !self.inner.backend.run_console_command_in_suspend(text) {
                    st.queue.finished(
                        &runnable,
                        TaskEvent::FinishingCancel,
                        Some("console input not supported in this suspend level"),
                    );
                    st.set_current(saved);
                    st.submit_type = saved_submit_type;
                    return Some(Picked::Refused);
                }
            }
            match runnable.resume_command() {
                Some(cmd) => st.exit_detail = cmd.detail(),
                None => {
                    let policy = &self.inner.resume_policy;
                    let detail = policy.detail_for(runnable.submit_type());
                    if st.status == ToolStatus::StartedSuspended
                        || policy.priority(detail) >= policy.priority(st.exit_detail)
                    {
                        st.exit_detail = detail;
                    }
                }
            }
        }

        let progress = Progress::new(runnable.label());
        st.change_status(ToolStatus::StartedProcessing, Some(progress.clone()));
        Some(Picked::Run {
            lane,
            runnable,
            saved,
            progress,
        })
    }

    /// Executes one entry according to its kind.
    pub(super) async fn run_runnable(
        &self,
        service: &ToolService,
        runnable: &RunnableRef,
        progress: &Progress,
    ) -> Result<(), TaskError> {
        match runnable.kind() {
            RunnableKind::Start | RunnableKind::SuspendedInsert { .. } => Ok(()),
            RunnableKind::Console { text, .. } => service.submit_to_console(text, progress).await,
            RunnableKind::SuspendedUpdate => {
                self.run_suspend_updates(service, progress).await;
                Ok(())
            }
            RunnableKind::Resume(cmd) => self.run_resume(service, runnable, *cmd, progress).await,
            RunnableKind::Task(task) => task.run(service, progress).await,
        }
    }

    async fn run_suspend_updates(&self, service: &ToolService, progress: &Progress) {
        let tasks = self.with_state(|st| st.suspend_update_tasks.clone());
        for task in tasks {
            if let Err(err) = task.run(service, progress).await {
                if !err.is_silent() {
                    tracing::error!(tool = %self.name(), task = %task.label(), error = %err, "suspend update task failed");
                }
                if self.is_terminated() {
                    return;
                }
            }
        }
    }

    /// Leaves the served suspend level; a quit command then asks the tool to quit.
    async fn run_resume(
        &self,
        service: &ToolService,
        runnable: &RunnableRef,
        cmd: ResumeCommand,
        progress: &Progress,
    ) -> Result<(), TaskError> {
        self.with_state(|st| {
            if st.loop_level > 0 {
                st.suspend_exit = Some(RunnableRef::clone(runnable));
            }
            let lower = st.lower_level;
            st.set_suspended(lower, DebugDetail::Unspecified);
        });
        self.wake();

        if cmd != ResumeCommand::Quit || self.is_terminated() {
            return Ok(());
        }
        self.brief_about_to_change();
        match self.inner.backend.quit(service, progress).await {
            Ok(()) => {
                if !self.inner.backend.is_alive() {
                    self.mark_as_terminated();
                }
            }
            Err(err) => {
                if !self.is_terminated() {
                    let report = StatusReport::error(format!("{}: quit command failed: {err}", self.name()));
                    self.handle_status(report, progress).await;
                }
            }
        }
        Ok(())
    }
}
