//! Debug-event policies.
//!
//! This module groups the knobs that decide **how a resume is reported** to
//! debugger front-ends while the controller serves a suspend level.
//!
//! ## Contents
//! - [`DebugDetail`] reason attached to suspend/resume notifications
//! - [`ResumeDetailPolicy`] maps a submit category to a resume detail and ranks details
//! - [`DefaultResumePolicy`] the stock mapping
//!
//! ## Quick wiring
//! ```text
//! loop_run_task (inside a suspend level)
//!      └─► policy.detail_for(task.submit_type())
//!           └─► replaces the exit detail when policy.priority(new) >= policy.priority(current)
//! ```

mod resume;

pub use resume::{DebugDetail, DefaultResumePolicy, ResumeDetailPolicy};
