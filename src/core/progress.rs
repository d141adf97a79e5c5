//! # Progress tracker.
//!
//! Every task runs with a [`Progress`]: a label, a cancellation token and a
//! free-form sub-task text. Cancellation is cooperative; `cancel_task` only flips
//! the token (and interrupts the tool when the transport supports it).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Cheap-to-clone progress handle.
#[derive(Clone)]
pub struct Progress {
    inner: Arc<Inner>,
}

struct Inner {
    label: Arc<str>,
    token: CancellationToken,
    sub_task: Mutex<Option<String>>,
    done: AtomicBool,
}

impl Progress {
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                label: label.into(),
                token: CancellationToken::new(),
                sub_task: Mutex::new(None),
                done: AtomicBool::new(false),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once the tracker is cancelled.
    pub async fn canceled(&self) {
        self.inner.token.cancelled().await
    }

    pub fn set_sub_task(&self, text: impl Into<String>) {
        *self.inner.sub_task.lock() = Some(text.into());
    }

    pub fn sub_task(&self) -> Option<String> {
        self.inner.sub_task.lock().clone()
    }

    pub fn done(&self) {
        self.inner.done.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }

    /// Whether both handles point at the same tracker.
    pub fn same(&self, other: &Progress) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("label", &self.label())
            .field("canceled", &self.is_canceled())
            .field("done", &self.is_done())
            .finish()
    }
}
