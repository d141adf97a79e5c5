//! # Function-backed task (`TaskFn`)
//!
//! [`TaskFn`] wraps a closure `F: Fn(Progress) -> Fut`, producing a fresh future per run.
//! Shared state goes into an explicit `Arc<...>` captured by the closure.
//!
//! ## Example
//! ```rust
//! use toolvisor::{Progress, SubmitType, TaskError, TaskFn, TaskRef};
//!
//! let t: TaskRef = TaskFn::arc("refresh", |progress: Progress| async move {
//!     if progress.is_canceled() {
//!         return Err(TaskError::Canceled);
//!     }
//!     Ok(())
//! });
//!
//! assert_eq!(t.label(), "refresh");
//! assert_eq!(t.submit_type(), SubmitType::Other);
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Progress, ToolService};
use crate::error::TaskError;
use crate::tasks::task::{SubmitType, Task, TaskEvent};

type ChangedFn = dyn Fn(TaskEvent) -> bool + Send + Sync;

/// Function-backed task implementation.
pub struct TaskFn<F> {
    type_id: Cow<'static, str>,
    label: Cow<'static, str>,
    submit_type: SubmitType,
    on_changed: Option<Arc<ChangedFn>>,
    f: F,
}

impl<F> TaskFn<F> {
    /// Creates a task with type id `"fn"` and category [`SubmitType::Other`].
    pub fn new(label: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            type_id: Cow::Borrowed("fn"),
            label: label.into(),
            submit_type: SubmitType::Other,
            on_changed: None,
            f,
        }
    }

    /// Creates the task and returns it as a shared handle.
    pub fn arc(label: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(label, f))
    }

    /// Sets the type id.
    #[must_use]
    pub fn with_type_id(mut self, type_id: impl Into<Cow<'static, str>>) -> Self {
        self.type_id = type_id.into();
        self
    }

    /// Sets the submit category.
    #[must_use]
    pub fn with_submit_type(mut self, submit_type: SubmitType) -> Self {
        self.submit_type = submit_type;
        self
    }

    /// Installs a lifecycle callback (see [`Task::changed`]).
    #[must_use]
    pub fn on_changed(mut self, f: impl Fn(TaskEvent) -> bool + Send + Sync + 'static) -> Self {
        self.on_changed = Some(Arc::new(f));
        self
    }
}

impl<F> std::fmt::Debug for TaskFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFn")
            .field("type_id", &self.type_id)
            .field("label", &self.label)
            .field("submit_type", &self.submit_type)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: Fn(Progress) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn type_id(&self) -> &str {
        &self.type_id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn submit_type(&self) -> SubmitType {
        self.submit_type
    }

    fn changed(&self, event: TaskEvent) -> bool {
        match &self.on_changed {
            Some(f) => f(event),
            None => true,
        }
    }

    async fn run(&self, _service: &ToolService, progress: &Progress) -> Result<(), TaskError> {
        (self.f)(progress.clone()).await
    }
}
