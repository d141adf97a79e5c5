//! # Tool transport seam.
//!
//! [`ToolBackend`] is everything the controller needs from a concrete transport
//! (local process, RPC client, test script). [`ToolService`] is the handle the
//! lifecycle loop passes to tasks and backend hooks: it exposes the operations
//! that are only legal on the lifecycle loop.
//!
//! ```text
//!   producers ──► Controller (submit / cancel / quit)
//!                     │
//!                     ▼ lifecycle loop
//!               Task::run(&ToolService, &Progress)
//!                     │
//!                     ▼
//!               ToolBackend::submit / quit / exec_resume ...
//! ```
//!
//! Sync hooks (`is_alive`, `kill`, `interrupt`, `run_console_command_in_suspend`,
//! `request_hot_mode`, `cancel_post_task`) may be called from any thread, some of
//! them with the controller lock held: they must not call back into the controller.

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::core::cancel::CancelOptions;
use crate::core::handlers::CommandArgs;
use crate::core::{Controller, Progress};
use crate::error::{ControllerError, StatusReport, TaskError};
use crate::policies::DebugDetail;
use crate::tasks::{ResumeCommand, TaskRef};

/// Concrete tool lifecycle.
#[async_trait]
pub trait ToolBackend: Send + Sync + 'static {
    /// Starts the tool. An error is fatal: the controller terminates without reaching a started status.
    async fn start(&self, service: &ToolService, progress: &Progress) -> Result<(), ControllerError>;

    /// Kills the tool process. Called by [`Controller::kill`] from any thread.
    fn kill(&self);

    fn is_alive(&self) -> bool;

    /// Interrupts the running command (e.g. sends ctrl-c).
    fn interrupt(&self) -> Result<(), ControllerError> {
        Err(ControllerError::Unsupported {
            operation: "interrupt",
        })
    }

    /// Releases the tool after termination and returns its exit code.
    async fn finish(&self, service: &ToolService) -> i32 {
        let _ = service;
        0
    }

    /// Echoes `input` before it is submitted.
    async fn before_submit(&self, service: &ToolService, input: &str) -> Result<(), TaskError> {
        let _ = (service, input);
        Ok(())
    }

    /// Writes one line of input to the tool and waits until it is processed.
    async fn submit(
        &self,
        service: &ToolService,
        input: &str,
        progress: &Progress,
    ) -> Result<(), TaskError>;

    /// Asks the tool to quit.
    async fn quit(&self, service: &ToolService, progress: &Progress) -> Result<(), TaskError>;

    /// Whether console input may run inside a suspend level. Called with the lock held.
    fn run_console_command_in_suspend(&self, input: &str) -> bool {
        let _ = input;
        true
    }

    /// Whether a resume command can leave the current suspend level.
    async fn can_exec_resume(
        &self,
        command: ResumeCommand,
        progress: &Progress,
    ) -> Result<bool, TaskError> {
        let _ = (command, progress);
        Ok(true)
    }

    /// Resumes the tool after a suspend level was left.
    async fn exec_resume(
        &self,
        service: &ToolService,
        command: ResumeCommand,
        progress: &Progress,
    ) -> Result<(), TaskError> {
        let _ = (service, command, progress);
        Ok(())
    }

    /// Prepares hot mode when the lifecycle loop finds a hot task.
    ///
    /// The default drains the hot lane right away. Returning `false` reports a failure;
    /// the controller then checks tool liveness.
    async fn initialize_hot_mode(&self, service: &ToolService) -> bool {
        service.run_hot_mode_loop().await;
        true
    }

    /// Asks the transport to enter hot mode on its own (e.g. by interrupting a long read).
    ///
    /// `is_async` is `true` when called off the lifecycle loop.
    fn request_hot_mode(&self, is_async: bool) {
        let _ = is_async;
    }

    async fn on_hot_mode_enter(&self, service: &ToolService) {
        let _ = service;
    }

    async fn on_hot_mode_exit(&self, service: &ToolService) {
        let _ = service;
    }

    /// Control-lane task scheduled after `cancel_task` interrupted the tool.
    fn cancel_post_task(&self, options: CancelOptions) -> Option<TaskRef> {
        let _ = options;
        None
    }
}

/// Lifecycle-only view of a controller, handed to tasks and backend hooks.
pub struct ToolService {
    controller: Controller,
}

impl ToolService {
    pub(crate) fn new(controller: Controller) -> Self {
        Self { controller }
    }

    /// The controller this service belongs to (producer API).
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Echoes and submits one line of input through the backend.
    pub async fn submit_to_console(&self, input: &str, progress: &Progress) -> Result<(), TaskError> {
        let backend = self.controller.backend();
        backend.before_submit(self, input).await?;
        backend.submit(self, input, progress).await
    }

    /// Records a suspend request made by the tool (e.g. it hit a breakpoint).
    pub fn set_suspended(&self, level: u32, detail: DebugDetail) {
        self.controller.request_suspend(level, detail);
    }

    /// Serves suspend levels from inside the running task until the tool resumes.
    ///
    /// Returns at once when no level above the current one is requested.
    pub fn run_suspended_loop(&self) -> BoxFuture<'_, ()> {
        self.controller.run_suspended_loop(self)
    }

    /// Drains the hot lane without changing the visible status.
    pub async fn run_hot_mode_loop(&self) {
        self.controller.run_hot_mode_loop(self).await
    }

    pub async fn handle_status(&self, report: StatusReport, progress: &Progress) {
        self.controller.handle_status(report, progress).await
    }

    pub async fn execute_command(
        &self,
        id: &str,
        args: CommandArgs,
        progress: &Progress,
    ) -> Option<StatusReport> {
        self.controller.execute_command(id, args, progress).await
    }

    /// Queues a control-lane task.
    pub fn schedule_controller_runnable(&self, task: TaskRef) {
        self.controller.schedule_controller_runnable(task);
    }

    pub fn brief_about_to_change(&self) {
        self.controller.brief_about_to_change();
    }

    pub fn brief_changed(&self) {
        self.controller.brief_changed();
    }

    /// Reports that the tool is gone; the lifecycle loop finishes after the current task.
    pub fn mark_as_terminated(&self) {
        self.controller.mark_as_terminated();
    }

    pub fn is_terminated(&self) -> bool {
        self.controller.is_terminated()
    }

    /// Level the consume loop currently serves.
    pub fn current_level(&self) -> u32 {
        self.controller.with_state(|st| st.loop_level)
    }

    /// Level most recently requested.
    pub fn requested_level(&self) -> u32 {
        self.controller.with_state(|st| st.request_level)
    }
}
