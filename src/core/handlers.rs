//! # Command handlers.
//!
//! Named extension points the controller (and transports) consult for a small
//! set of events. Handlers are registered per event id; one handler may serve
//! several ids.
//!
//! | id                    | consulted by          | args                    |
//! |-----------------------|-----------------------|-------------------------|
//! | [`REPORT_STATUS`]     | the status gate       | [`CommandArgs::Status`] |
//! | [`SCHEDULE_QUIT`]     | `schedule_quit`       | [`CommandArgs::Tasks`]  |
//! | [`LOGIN_REQUEST`]     | transports            | [`CommandArgs::Text`]   |
//! | [`RUN_BLOCKING`]      | transports            | [`CommandArgs::Text`]   |
//!
//! A handler error is logged and treated as "no answer".

use async_trait::async_trait;

use crate::core::{Controller, Progress};
use crate::error::{StatusReport, TaskError};
use crate::tasks::RunnableRef;

pub const REPORT_STATUS: &str = "common/reportStatus";
pub const SCHEDULE_QUIT: &str = "common/scheduleQuit";
pub const LOGIN_REQUEST: &str = "common/login";
pub const RUN_BLOCKING: &str = "common/runBlocking";

/// Arguments passed to a [`CommandHandler`].
#[derive(Debug, Clone)]
pub enum CommandArgs {
    None,
    /// The report offered to the status gate.
    Status(StatusReport),
    /// Quit tasks already queued or running.
    Tasks(Vec<RunnableRef>),
    Text(String),
}

/// Handler for a named controller event.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    /// Handles `id`. `Ok` with a non-OK report vetoes or declines, depending on the event.
    async fn execute(
        &self,
        id: &str,
        controller: &Controller,
        args: &CommandArgs,
        progress: &Progress,
    ) -> Result<StatusReport, TaskError>;
}
