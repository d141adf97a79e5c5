//! # Cancellation, quit and termination.
//!
//! ```text
//! cancel_task(opts)  ── lock: drop queue (ALL) / pause (PAUSE) / cancel progress / unwind one level
//!                    ── backend.interrupt()           (Unsupported → false)
//!                    ── lock: cancel_post_task on control lane, wake
//!
//! schedule_quit()    ── SCHEDULE_QUIT handler (non-OK report = veto)
//!                    ── lock: queue the quit command unless vetoed or terminated
//!
//! kill()             ── backend.kill(), poke the loop kill_attempts times, mark terminated
//! ```
//!
//! `cancel_task` and `schedule_quit` hold the lifecycle loop (internal task count)
//! while they run so it does not pick new work halfway through. The hold is an
//! `InternalTask` guard, so a dropped `schedule_quit` future releases it too.

use crate::core::handlers::{CommandArgs, SCHEDULE_QUIT};
use crate::core::{Controller, Progress, ToolStatus};
use crate::error::ControllerError;
use crate::events::{Event, EventKind};
use crate::policies::DebugDetail;
use crate::tasks::{ResumeCommand, Runnable, RunnableKind, RunnableRef};

bitflags::bitflags! {
    /// Options of [`Controller::cancel_task`].
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CancelOptions: u32 {
        /// Cancel the current task only.
        const CURRENT = 0x00;
        /// Also remove every pending main-lane task.
        const ALL     = 0x01;
        /// Also pause the queue.
        const PAUSE   = 0x10;
    }
}

/// Releases one hold on the lifecycle loop when dropped.
///
/// Created right after the internal task count was raised under the lock.
struct InternalTask<'a> {
    controller: &'a Controller,
}

impl<'a> InternalTask<'a> {
    fn held(controller: &'a Controller) -> Self {
        Self { controller }
    }
}

impl Drop for InternalTask<'_> {
    fn drop(&mut self) {
        self.controller
            .with_state(|st| st.internal_tasks = st.internal_tasks.saturating_sub(1));
        self.controller.wake();
    }
}

impl Controller {
    /// Cancels the current task.
    ///
    /// Inside a suspend level the served level is left as well. Returns whether the
    /// backend could interrupt the tool.
    pub fn cancel_task(&self, options: CancelOptions) -> bool {
        self.with_state(|st| {
            if options.contains(CancelOptions::ALL) {
                let removed = st.queue.remove_all();
                st.forget_exit(&removed);
            }
            if options.contains(CancelOptions::PAUSE) {
                st.queue.pause();
            }
            if let Some(progress) = &st.progress {
                progress.cancel();
            }
            st.internal_tasks += 1;

            if st.request_level > st.loop_level {
                let level = st.loop_level;
                st.set_suspended(level, DebugDetail::Unspecified);
                st.exit_detail = DebugDetail::Resume;
            } else if st.loop_level > st.lower_level {
                let level = st.lower_level;
                st.set_suspended(level, DebugDetail::Unspecified);
                st.exit_detail = DebugDetail::Resume;
            }
            st.emit(Event::new(EventKind::CancelRequested).with_reason(format!("{options:?}")));
        });
        let hold = InternalTask::held(self);

        let interrupted = match self.inner.backend.interrupt() {
            Ok(()) => true,
            Err(ControllerError::Unsupported { .. }) => false,
            Err(err) => {
                tracing::warn!(tool = %self.name(), error = %err, "interrupting the tool failed");
                false
            }
        };

        let post = self
            .inner
            .backend
            .cancel_post_task(options)
            .map(Runnable::from_task);
        if let Some(post) = post {
            self.with_state(|st| st.schedule_control(post));
        }
        drop(hold);
        interrupted
    }

    /// Queues the quit command unless the schedule-quit handler vetoes it.
    ///
    /// Returns whether a quit command was queued.
    pub async fn schedule_quit(&self) -> bool {
        let quit_tasks = self.with_state(|st| {
            if st.terminated || st.status == ToolStatus::Terminated {
                return None;
            }
            st.internal_tasks += 1;
            Some(st.quit_tasks())
        });
        let Some(quit_tasks) = quit_tasks else {
            return false;
        };
        let hold = InternalTask::held(self);

        let progress = Progress::new("Schedule Quit");
        let veto = self
            .execute_command(SCHEDULE_QUIT, CommandArgs::Tasks(quit_tasks), &progress)
            .await
            .filter(|report| !report.is_ok());
        progress.done();

        let scheduled = self.with_state(|st| {
            let mut scheduled = false;
            if let Some(report) = veto {
                st.emit(Event::new(EventKind::QuitVetoed).with_reason(report.message));
            } else if st.status != ToolStatus::Terminated {
                let quit = Runnable::new(RunnableKind::Resume(ResumeCommand::Quit));
                if st.queue.add(RunnableRef::clone(&quit)).is_ok() {
                    st.emit(Event::for_runnable(EventKind::QuitScheduled, &quit));
                    scheduled = true;
                }
            }
            scheduled
        });
        drop(hold);
        scheduled
    }

    /// Removes pending quit commands and cancels a running one.
    pub fn cancel_quit(&self) {
        let running_quit = self.with_state(|st| {
            let quit = st.quit_tasks();
            st.remove_tasks(&quit);
            if !quit.is_empty() {
                st.emit(Event::new(EventKind::QuitCanceled));
            }
            if st.status == ToolStatus::Terminated {
                return false;
            }
            st.current.as_ref().is_some_and(|r| r.is_quit())
        });
        self.wake();
        if running_quit {
            self.cancel_task(CancelOptions::CURRENT);
        }
    }

    /// Kills the tool and makes sure the lifecycle loop notices.
    pub async fn kill(&self) {
        self.inner.backend.kill();
        let running = self.with_state(|st| st.running);
        if running {
            for _ in 0..self.inner.cfg.kill_attempts {
                if self.is_terminated() {
                    return;
                }
                self.wake();
                tokio::time::sleep(self.inner.cfg.kill_poll).await;
                if let Some(progress) = self.progress_info() {
                    progress.cancel();
                }
            }
        }
        if !self.is_terminated() {
            self.mark_as_terminated();
        }
    }

    /// Marks the tool as gone; the lifecycle loop finishes after the current task.
    pub(crate) fn mark_as_terminated(&self) {
        if self.inner.backend.is_alive() {
            tracing::error!(tool = %self.name(), "tool marked as terminated but still alive");
        }
        self.with_state(|st| st.terminated = true);
        self.wake();
    }
}
