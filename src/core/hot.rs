//! # Hot mode.
//!
//! Hot tasks run on the lifecycle loop without touching the visible status: a
//! variable viewer can evaluate something while the console shows "processing"
//! or "suspended". The backend decides when hot mode is entered
//! ([`ToolBackend::request_hot_mode`](crate::ToolBackend::request_hot_mode) /
//! [`initialize_hot_mode`](crate::ToolBackend::initialize_hot_mode)); the drain
//! itself is [`ToolService::run_hot_mode_loop`].
//!
//! ## Rules
//! - Requests before startup completed are deferred until the tool started.
//! - Every hot task gets its own progress tracker.
//! - A loop-triggered drain waits once (the straggler wait) for late hot tasks.
//! - The submit category is `Other` while hot tasks run and restored afterwards.

use crate::core::tool::ToolService;
use crate::core::{Controller, Progress, ToolStatus};
use crate::events::{Event, EventKind};
use crate::tasks::{RunnableRef, START_TYPE_ID, SubmitType, TaskEvent};

use super::run_loop::outcome;

enum HotRequest {
    Drop,
    Deferred,
    Request,
}

impl Controller {
    /// Asks the backend to enter hot mode, or defers the request until the tool started.
    pub(crate) fn schedule_hot_mode(&self) {
        let request = self.with_state(|st| match st.status {
            ToolStatus::Terminated => HotRequest::Drop,
            ToolStatus::Starting
                if st
                    .current
                    .as_ref()
                    .is_some_and(|r| r.type_id() == START_TYPE_ID) =>
            {
                st.hot_deferred = true;
                HotRequest::Deferred
            }
            _ => HotRequest::Request,
        });
        if let HotRequest::Request = request {
            self.inner.backend.request_hot_mode(!self.is_on_lifecycle());
        }
    }

    /// Drains the hot lane. Called by the backend on the lifecycle loop.
    pub(crate) async fn run_hot_mode_loop(&self, service: &ToolService) {
        let saved_submit_type = self.with_state(|st| st.submit_type);
        loop {
            let Some(runnable) = self.poll_hot_runnable().await else {
                let was_hot = self.with_state(|st| st.hot_mode);
                if was_hot {
                    self.inner.backend.on_hot_mode_exit(service).await;
                    self.with_state(|st| {
                        st.hot_mode = false;
                        st.submit_type = saved_submit_type;
                        st.emit(Event::new(EventKind::HotModeExited));
                    });
                }
                return;
            };

            let entering = self.with_state(|st| {
                if st.hot_mode {
                    return false;
                }
                st.hot_mode = true;
                st.submit_type = SubmitType::Other;
                st.emit(Event::new(EventKind::HotModeEntered));
                true
            });
            if entering {
                self.inner.backend.on_hot_mode_enter(service).await;
            }

            let progress = Progress::new(runnable.label());
            let res = self.run_runnable(service, &runnable, &progress).await;
            progress.done();

            let (event, reason) = outcome(&res);
            if event == TaskEvent::FinishingError {
                tracing::error!(
                    tool = %self.name(),
                    task = %runnable.label(),
                    error = reason.as_deref().unwrap_or_default(),
                    "hot task failed"
                );
            }
            self.with_state(|st| st.queue.finished(&runnable, event, reason.as_deref()));
            if res.is_err() && !self.inner.backend.is_alive() {
                self.mark_as_terminated();
            }
        }
    }

    async fn poll_hot_runnable(&self) -> Option<RunnableRef> {
        let (first, nested) = self.with_state(|st| {
            if st.terminated {
                (None, true)
            } else {
                (st.queue.poll_hot(), st.hot_nested)
            }
        });
        if first.is_some() || nested {
            return first;
        }
        let wait = self.inner.cfg.straggler_wait()?;
        let _ = tokio::time::timeout(wait, self.inner.wake.notified()).await;
        self.with_state(|st| {
            if st.terminated {
                None
            } else {
                st.queue.poll_hot()
            }
        })
    }
}
