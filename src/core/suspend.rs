//! # Suspend engine.
//!
//! The tool may ask to suspend (a breakpoint) while a task runs. The running task
//! then calls [`ToolService::run_suspended_loop`], which serves the queue at the
//! requested level from inside that task. A deeper request while a level is served
//! nests another loop on the call stack, so levels unwind last-in first-out.
//!
//! ```text
//! T1.run ─► run_suspended_loop          (floor 0)
//!             ├─ marker [1] at front, updater on idle
//!             ├─ loop_suspended(1) ─► T2.run ─► run_suspended_loop (floor 1)
//!             │                                   ├─ marker [2]
//!             │                                   └─ loop_suspended(2) ... exit ─► resume
//!             └─ exit ─► resume command (can_exec_resume / exec_resume) ─► back in T1
//! ```
//!
//! ## Rules
//! - A loop returns once the requested level is at or below its floor.
//! - Markers stay at the front of the main lane while their level is served.
//! - The exit command runs under the progress tracker saved when the level was entered.

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::core::run_loop::Park;
use crate::core::tool::ToolService;
use crate::core::{Controller, Progress, ToolStatus};
use crate::policies::DebugDetail;
use crate::queue::NextRunnable;
use crate::tasks::{ResumeCommand, Runnable, RunnableKind, RunnableRef};

enum AfterLevel {
    Stop,
    Again,
    Exit(Option<RunnableRef>),
}

impl Controller {
    /// Serves suspend levels above the current floor until the tool resumes.
    pub(crate) fn run_suspended_loop<'a>(&'a self, service: &'a ToolService) -> BoxFuture<'a, ()> {
        async move { self.suspended_loop(service).await }.boxed()
    }

    async fn suspended_loop(&self, service: &ToolService) {
        let (saved_current, saved_progress, saved_status, saved_lower, saved_level) =
            self.with_state(|st| {
                let saved_lower = st.lower_level;
                st.lower_level = st.run_level;
                (
                    st.current.clone(),
                    st.progress.clone(),
                    st.status,
                    saved_lower,
                    st.run_level,
                )
            });
        let mut marker: Option<RunnableRef> = None;
        let mut updater: Option<RunnableRef> = None;

        loop {
            let level = self.with_state(|st| {
                let this_level = st.request_level;
                if this_level <= saved_level {
                    st.set_suspended(this_level, DebugDetail::Unspecified);
                    return None;
                }
                if st.loop_level != this_level || marker.is_none() {
                    st.loop_level = this_level;
                    st.run_level = this_level;
                    let m = Runnable::marker(this_level);
                    st.queue.insert_at_front(RunnableRef::clone(&m));
                    marker = Some(m);
                    if saved_level == 0 && updater.is_none() {
                        if let Some(timeout) = self.inner.cfg.suspend_update_timeout() {
                            let u = Runnable::new(RunnableKind::SuspendedUpdate);
                            st.queue.add_on_idle(RunnableRef::clone(&u), timeout);
                            updater = Some(u);
                        }
                    }
                }
                st.exit_detail = DebugDetail::Unspecified;
                Some(this_level)
            });
            let Some(this_level) = level else {
                break;
            };

            tracing::debug!(tool = %self.name(), level = this_level, "serving suspend level");
            self.loop_suspended(service, this_level).await;

            let after = self.with_state(|st| {
                st.exit_detail = DebugDetail::Unspecified;
                if st.terminated {
                    st.set_suspended(0, DebugDetail::Unspecified);
                    return AfterLevel::Stop;
                }
                st.loop_level = saved_level;
                st.enter_detail = DebugDetail::Unspecified;
                if let Some(m) = marker.take() {
                    st.queue.remove_inserted(&m);
                }
                if this_level <= st.request_level {
                    return AfterLevel::Again;
                }
                let exit = st.suspend_exit.take();
                if let Some(r) = &exit {
                    st.queue.remove(std::slice::from_ref(r));
                    st.control.retain(|c| c.id() != r.id());
                }
                AfterLevel::Exit(exit)
            });

            match after {
                AfterLevel::Stop => break,
                AfterLevel::Again => continue,
                AfterLevel::Exit(Some(runnable)) => {
                    self.exec_suspend_exit(
                        service,
                        runnable,
                        saved_current.clone(),
                        saved_progress.clone(),
                        this_level,
                    )
                    .await;
                }
                AfterLevel::Exit(None) => self.with_state(|st| {
                    st.exit_detail = DebugDetail::Unspecified;
                    if saved_current.is_some() {
                        st.change_status(ToolStatus::StartedProcessing, saved_progress.clone());
                    }
                }),
            }
        }

        self.with_state(|st| {
            st.lower_level = saved_lower;
            st.run_level = saved_level;
            st.set_current(saved_current);
            st.change_status(saved_status, saved_progress);
            if st.loop_level != saved_level {
                st.loop_level = saved_level;
                st.enter_detail = DebugDetail::Unspecified;
            }
            if let Some(u) = &updater {
                st.queue.remove_on_idle(u);
            }
            if let Some(m) = &marker {
                st.queue.remove_inserted(m);
            }
            st.suspend_exit = None;
            let level = st.request_level;
            st.set_suspended(level, DebugDetail::Unspecified);
        });
        self.wake();
    }

    /// Runs the exit command of a level under the saved progress tracker.
    async fn exec_suspend_exit(
        &self,
        service: &ToolService,
        runnable: RunnableRef,
        saved_current: Option<RunnableRef>,
        saved_progress: Option<Progress>,
        this_level: u32,
    ) {
        let Some(cmd) = runnable.resume_command() else {
            return;
        };
        let progress = saved_progress.unwrap_or_else(|| Progress::new(runnable.label()));
        self.with_state(|st| st.set_current(Some(saved_current.unwrap_or(runnable))));

        let can_exec = match cmd {
            ResumeCommand::Quit => Ok(true),
            _ => self.inner.backend.can_exec_resume(cmd, &progress).await,
        };
        match can_exec {
            Ok(true) => {
                self.with_state(|st| {
                    st.exit_detail = cmd.detail();
                    st.change_status(ToolStatus::StartedProcessing, Some(progress.clone()));
                });
                if cmd == ResumeCommand::Quit {
                    return;
                }
                if let Err(err) = self.inner.backend.exec_resume(service, cmd, &progress).await {
                    tracing::error!(tool = %self.name(), command = cmd.label(), error = %err, "debug command failed");
                }
            }
            Ok(false) => self.with_state(|st| st.request_level = this_level),
            Err(err) => {
                tracing::error!(tool = %self.name(), command = cmd.label(), error = %err, "debug command failed");
            }
        }
    }

    /// Consume loop bounded to `level`: returns once the request drops below it.
    async fn loop_suspended(&self, service: &ToolService, level: u32) {
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
                if st.terminated || st.request_level < level {
                    return Park::Exit;
                }
                if !st.control.is_empty() {
                    return Park::Continue;
                }
                if st.request_level > level {
                    return Park::Suspend;
                }
                if st.queue.next_runnable(Instant::now()) != NextRunnable::None {
                    return Park::Continue;
                }
                if st.queue.is_paused() {
                    st.change_status(ToolStatus::StartedPaused, None);
                    return Park::Wait(None);
                }
                st.change_status(ToolStatus::StartedSuspended, None);
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
}
