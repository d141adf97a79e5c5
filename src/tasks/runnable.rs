//! # Queue entries.
//!
//! A [`Runnable`] is what the queue and the lanes actually hold: either a producer
//! [`Task`] or one of the controller's own entries (start, console input, suspend
//! markers, the debug-context updater, resume commands). The controller entries form
//! a closed set, so they are variants of one enum instead of task implementations.
//!
//! Identity is the numeric id assigned at construction; two `Runnable`s are equal
//! when their ids are.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::policies::DebugDetail;
use crate::tasks::task::{SubmitType, TaskEvent, TaskRef};

pub const START_TYPE_ID: &str = "common/start";
pub const QUIT_TYPE_ID: &str = "common/quit";
pub const CONSOLE_INPUT_TYPE_ID: &str = "common/console/input";
pub const SUSPENDED_INSERT_TYPE_ID: &str = "common/debug/suspended.insert";
pub const SUSPENDED_UPDATE_TYPE_ID: &str = "common/debug/suspended.update";
pub const RESUME_TYPE_ID: &str = "common/debug/resume";
pub const STEP_INTO_TYPE_ID: &str = "common/debug/step.in";
pub const STEP_OVER_TYPE_ID: &str = "common/debug/step.over";
pub const STEP_RETURN_TYPE_ID: &str = "common/debug/step.return";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to a queue entry.
pub type RunnableRef = Arc<Runnable>;

/// Command that leaves the current suspend level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResumeCommand {
    /// Continue until the next breakpoint.
    Resume,
    /// Step into the next call.
    StepInto,
    /// Step over the next expression.
    StepOver,
    /// Step out of the current frame.
    StepReturn,
    /// Quit the tool.
    Quit,
}

impl ResumeCommand {
    pub fn type_id(self) -> &'static str {
        match self {
            ResumeCommand::Resume => RESUME_TYPE_ID,
            ResumeCommand::StepInto => STEP_INTO_TYPE_ID,
            ResumeCommand::StepOver => STEP_OVER_TYPE_ID,
            ResumeCommand::StepReturn => STEP_RETURN_TYPE_ID,
            ResumeCommand::Quit => QUIT_TYPE_ID,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResumeCommand::Resume => "Resume",
            ResumeCommand::StepInto => "Step Into",
            ResumeCommand::StepOver => "Step Over",
            ResumeCommand::StepReturn => "Step Return",
            ResumeCommand::Quit => "Quit",
        }
    }

    /// Exit detail reported when the command resumes the tool.
    pub fn detail(self) -> DebugDetail {
        match self {
            ResumeCommand::Resume | ResumeCommand::Quit => DebugDetail::ClientRequest,
            ResumeCommand::StepInto => DebugDetail::StepInto,
            ResumeCommand::StepOver => DebugDetail::StepOver,
            ResumeCommand::StepReturn => DebugDetail::StepReturn,
        }
    }
}

pub(crate) enum RunnableKind {
    Start,
    Console {
        text: String,
        label: String,
        submit_type: SubmitType,
    },
    SuspendedInsert {
        level: u32,
        label: String,
    },
    SuspendedUpdate,
    Resume(ResumeCommand),
    Task(TaskRef),
}

/// Entry of the task queue or one of its lanes.
pub struct Runnable {
    id: u64,
    kind: RunnableKind,
}

impl Runnable {
    pub(crate) fn new(kind: RunnableKind) -> RunnableRef {
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            kind,
        })
    }

    pub(crate) fn from_task(task: TaskRef) -> RunnableRef {
        Self::new(RunnableKind::Task(task))
    }

    pub(crate) fn console(text: &str, submit_type: SubmitType) -> RunnableRef {
        Self::new(RunnableKind::Console {
            text: text.to_owned(),
            label: text.trim().to_owned(),
            submit_type,
        })
    }

    pub(crate) fn marker(level: u32) -> RunnableRef {
        Self::new(RunnableKind::SuspendedInsert {
            level,
            label: format!("Suspended [{level}]"),
        })
    }

    pub(crate) fn kind(&self) -> &RunnableKind {
        &self.kind
    }

    /// Unique id of this entry.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn type_id(&self) -> &str {
        match &self.kind {
            RunnableKind::Start => START_TYPE_ID,
            RunnableKind::Console { .. } => CONSOLE_INPUT_TYPE_ID,
            RunnableKind::SuspendedInsert { .. } => SUSPENDED_INSERT_TYPE_ID,
            RunnableKind::SuspendedUpdate => SUSPENDED_UPDATE_TYPE_ID,
            RunnableKind::Resume(cmd) => cmd.type_id(),
            RunnableKind::Task(t) => t.type_id(),
        }
    }

    pub fn label(&self) -> &str {
        match &self.kind {
            RunnableKind::Start => "Start",
            RunnableKind::Console { label, .. } => label,
            RunnableKind::SuspendedInsert { label, .. } => label,
            RunnableKind::SuspendedUpdate => "Update Debug Context",
            RunnableKind::Resume(cmd) => cmd.label(),
            RunnableKind::Task(t) => t.label(),
        }
    }

    pub fn submit_type(&self) -> SubmitType {
        match &self.kind {
            RunnableKind::Console { submit_type, .. } => *submit_type,
            RunnableKind::Resume(_) => SubmitType::Tools,
            RunnableKind::Task(t) => t.submit_type(),
            _ => SubmitType::Other,
        }
    }

    /// The producer task, if this entry wraps one.
    pub fn task(&self) -> Option<&TaskRef> {
        match &self.kind {
            RunnableKind::Task(t) => Some(t),
            _ => None,
        }
    }

    /// The resume command, if this entry is one.
    pub fn resume_command(&self) -> Option<ResumeCommand> {
        match &self.kind {
            RunnableKind::Resume(cmd) => Some(*cmd),
            _ => None,
        }
    }

    /// Whether this entry is a suspend level marker.
    pub fn is_marker(&self) -> bool {
        matches!(self.kind, RunnableKind::SuspendedInsert { .. })
    }

    /// Whether this entry is a quit command.
    pub fn is_quit(&self) -> bool {
        self.type_id() == QUIT_TYPE_ID
    }

    /// Delivers a lifecycle event. Returns `false` when the entry vetoes it.
    pub(crate) fn changed(&self, event: TaskEvent) -> bool {
        match &self.kind {
            RunnableKind::Start => !event.is_removal(),
            RunnableKind::Console { .. } => true,
            RunnableKind::SuspendedInsert { .. } => {
                !matches!(event, TaskEvent::RemovingFrom | TaskEvent::MovingFrom)
            }
            RunnableKind::SuspendedUpdate | RunnableKind::Resume(_) => {
                event != TaskEvent::MovingFrom
            }
            RunnableKind::Task(t) => t.changed(event),
        }
    }
}

impl PartialEq for Runnable {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Runnable {}

impl std::fmt::Debug for Runnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runnable")
            .field("id", &self.id)
            .field("type_id", &self.type_id())
            .field("label", &self.label())
            .finish()
    }
}
