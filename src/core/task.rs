//! Task thunks and progress reporting.

use std::any::Any;
use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::{ProgressEnvelope, TaskIdentity};

type BoxedWork<T> =
    Box<dyn FnOnce(ProgressReporter<T>) -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// Deferred unit of work, invoked at most once when the runner launches it.
pub struct Thunk<T> {
    work: BoxedWork<T>,
}

impl<T: Send + 'static> Thunk<T> {
    /// Zero-argument operation producing a result or failing.
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            work: Box::new(move |_reporter: ProgressReporter<T>| work().boxed()),
        }
    }

    /// Operation that may emit intermediate progress before its result.
    pub fn with_progress<F, Fut>(work: F) -> Self
    where
        F: FnOnce(ProgressReporter<T>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            work: Box::new(move |reporter: ProgressReporter<T>| work(reporter).boxed()),
        }
    }

    /// Run the operation. The closure itself is only called once the returned
    /// future is first polled.
    pub(crate) fn invoke(self, reporter: ProgressReporter<T>) -> BoxFuture<'static, anyhow::Result<T>> {
        async move { (self.work)(reporter).await }.boxed()
    }
}

impl<T> fmt::Debug for Thunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Thunk")
    }
}

/// A thunk tagged with the identity its envelopes are reported under.
pub struct Task<T> {
    identity: TaskIdentity,
    thunk: Thunk<T>,
}

impl<T: Send + 'static> Task<T> {
    /// Task from a zero-argument async operation.
    pub fn new<F, Fut>(identity: impl Into<TaskIdentity>, work: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::from_thunk(identity, Thunk::new(work))
    }

    /// Task whose operation receives a [`ProgressReporter`].
    pub fn with_progress<F, Fut>(identity: impl Into<TaskIdentity>, work: F) -> Self
    where
        F: FnOnce(ProgressReporter<T>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::from_thunk(identity, Thunk::with_progress(work))
    }
}

impl<T> Task<T> {
    /// Task from an existing thunk.
    pub fn from_thunk(identity: impl Into<TaskIdentity>, thunk: Thunk<T>) -> Self {
        Self {
            identity: identity.into(),
            thunk,
        }
    }

    /// Identity envelopes for this task are tagged with.
    pub const fn identity(&self) -> &TaskIdentity {
        &self.identity
    }

    pub(crate) fn into_parts(self) -> (TaskIdentity, Thunk<T>) {
        (self.identity, self.thunk)
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Handle a running task uses to emit `Intermediate` envelopes.
pub struct ProgressReporter<T> {
    identity: TaskIdentity,
    tx: Option<UnboundedSender<ProgressEnvelope<T>>>,
}

impl<T> ProgressReporter<T> {
    pub(crate) fn new(
        identity: TaskIdentity,
        tx: UnboundedSender<ProgressEnvelope<T>>,
    ) -> Self {
        Self {
            identity,
            tx: Some(tx),
        }
    }

    /// Reporter that drops every update, for work executed outside a run.
    pub fn detached(identity: TaskIdentity) -> Self {
        Self { identity, tx: None }
    }

    /// Identity updates are tagged with.
    pub const fn identity(&self) -> &TaskIdentity {
        &self.identity
    }

    /// Emit an intermediate value. Returns `false` if nobody is listening any more.
    pub fn report(&self, value: T) -> bool {
        self.tx.as_ref().is_some_and(|tx| {
            tx.send(ProgressEnvelope::Intermediate {
                task_identity: self.identity.clone(),
                value,
            })
            .is_ok()
        })
    }
}

impl<T> Clone for ProgressReporter<T> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for ProgressReporter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("identity", &self.identity)
            .field("attached", &self.tx.is_some())
            .finish()
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
