//! # Resume detail policy.
//!
//! While a suspend level is served, every task that runs "resumes" the tool for
//! a moment. Front-ends want to know *why*: an explicit step, an evaluation typed by
//! the user, an implicit evaluation issued by tooling, or nothing in particular.
//!
//! The controller keeps one exit detail per suspend level. A task replaces it when
//! the level is in `StartedSuspended`, or when the new detail ranks at least as high
//! as the current one:
//!
//! ```text
//! EvaluationImplicit (1) < Evaluation (2) < Step* (3) < anything else (4)
//! ```
//!
//! Implement [`ResumeDetailPolicy`] to change the mapping or the ranking.

use crate::tasks::SubmitType;

/// Reason attached to suspend and resume notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DebugDetail {
    /// No particular reason.
    #[default]
    Unspecified,
    /// Step into the next call.
    StepInto,
    /// Step over the next expression.
    StepOver,
    /// Step until the current frame returns.
    StepReturn,
    /// A step finished and the tool suspended again.
    StepEnd,
    /// Evaluation requested explicitly (tool views, user commands).
    Evaluation,
    /// Evaluation issued implicitly by tooling.
    EvaluationImplicit,
    /// Resume requested by a client (continue, quit).
    ClientRequest,
    /// Plain resume.
    Resume,
    /// Suspended at a breakpoint.
    Breakpoint,
}

impl DebugDetail {
    /// Whether the detail starts a step.
    pub fn is_step(self) -> bool {
        matches!(
            self,
            DebugDetail::StepInto | DebugDetail::StepOver | DebugDetail::StepReturn
        )
    }

    /// Short stable label for logs.
    pub fn as_label(self) -> &'static str {
        match self {
            DebugDetail::Unspecified => "unspecified",
            DebugDetail::StepInto => "step_into",
            DebugDetail::StepOver => "step_over",
            DebugDetail::StepReturn => "step_return",
            DebugDetail::StepEnd => "step_end",
            DebugDetail::Evaluation => "evaluation",
            DebugDetail::EvaluationImplicit => "evaluation_implicit",
            DebugDetail::ClientRequest => "client_request",
            DebugDetail::Resume => "resume",
            DebugDetail::Breakpoint => "breakpoint",
        }
    }
}

/// Maps submit categories to resume details and ranks details against each other.
pub trait ResumeDetailPolicy: Send + Sync + 'static {
    /// Detail reported when a task of the given category runs inside a suspend level.
    fn detail_for(&self, submit_type: SubmitType) -> DebugDetail;

    /// Rank of a detail; a higher rank wins.
    fn priority(&self, detail: DebugDetail) -> u8;
}

/// Stock policy.
///
/// | category          | detail               |
/// |-------------------|----------------------|
/// | `Console`/`Editor`| `Unspecified`        |
/// | `Other`           | `EvaluationImplicit` |
/// | `Tools`           | `Evaluation`         |
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResumePolicy;

impl ResumeDetailPolicy for DefaultResumePolicy {
    fn detail_for(&self, submit_type: SubmitType) -> DebugDetail {
        match submit_type {
            SubmitType::Console | SubmitType::Editor => DebugDetail::Unspecified,
            SubmitType::Other => DebugDetail::EvaluationImplicit,
            SubmitType::Tools => DebugDetail::Evaluation,
        }
    }

    fn priority(&self, detail: DebugDetail) -> u8 {
        match detail {
            DebugDetail::EvaluationImplicit => 1,
            DebugDetail::Evaluation => 2,
            DebugDetail::StepInto | DebugDetail::StepOver | DebugDetail::StepReturn => 3,
            _ => 4,
        }
    }
}
