//! Capacity-gated task pool runner.
//!
//! A [`TaskPoolRunner`] drains a [`TaskSource`] with bounded concurrency:
//!
//! 1. While the source may have more work, acquire one unit from the
//!    [`CapacitySource`] (suspending if the chain is saturated).
//! 2. Pull the next task only once the unit is held, and launch it through the
//!    [`Spawn`] adapter.
//! 3. When a task finishes, release its unit and emit a `Final` or `Error`
//!    envelope immediately, so envelopes arrive in completion order.
//! 4. The run ends once the source is exhausted and no task is in flight.
//!
//! A failing task never affects its siblings. A failing source stops further
//! pulls; tasks already in flight still report, and the source failure is
//! yielded last as a run-level error.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{FutureExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::{
    CapacityPermit, CapacitySource, ProgressEnvelope, ProgressReporter, Task, TaskIdentity,
    TaskPoolError, TaskSource,
};
use crate::core::task::panic_message;

/// Abstraction for spawning task execution on a runtime.
pub trait Spawn {
    /// Spawn an async task that returns a future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Runs tasks from a source under a capacity budget.
pub struct TaskPoolRunner<T, Src, S> {
    label: String,
    source: Src,
    capacity: CapacitySource,
    spawner: S,
    _result_marker: PhantomData<fn() -> T>,
}

impl<T, Src, S> TaskPoolRunner<T, Src, S>
where
    T: Send + 'static,
    Src: TaskSource<T> + 'static,
    S: Spawn + Clone + Send + 'static,
{
    /// Create a runner. Nothing is pulled or launched until [`run_tasks`](Self::run_tasks).
    pub fn new(label: impl Into<String>, source: Src, capacity: CapacitySource, spawner: S) -> Self {
        Self {
            label: label.into(),
            source,
            capacity,
            spawner,
            _result_marker: PhantomData,
        }
    }

    /// Label used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Start draining the source and return the stream of envelopes.
    ///
    /// The run consumes the runner; re-running needs a new runner and source.
    /// Dropping the returned [`TaskRun`] stops further pulls, while tasks already
    /// launched run to completion and release their capacity.
    pub fn run_tasks(self) -> TaskRun<T> {
        let run_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let failure = Arc::new(Mutex::new(None));

        info!(
            runner = %self.label,
            %run_id,
            capacity = %self.capacity.label(),
            "task run started"
        );

        let driver = Driver {
            label: self.label.clone(),
            run_id,
            source: self.source,
            capacity: self.capacity,
            spawner: self.spawner.clone(),
            tx,
            failure: Arc::clone(&failure),
        };
        self.spawner.spawn(driver.drive());

        TaskRun {
            label: self.label,
            run_id,
            rx,
            failure,
            summary: RunSummary::default(),
            finished: false,
        }
    }
}

/// Background loop that pulls and launches tasks for one run.
struct Driver<T, Src, S> {
    label: String,
    run_id: Uuid,
    source: Src,
    capacity: CapacitySource,
    spawner: S,
    tx: UnboundedSender<ProgressEnvelope<T>>,
    failure: Arc<Mutex<Option<TaskPoolError>>>,
}

impl<T, Src, S> Driver<T, Src, S>
where
    T: Send + 'static,
    Src: TaskSource<T> + 'static,
    S: Spawn + Clone + Send + 'static,
{
    async fn drive(mut self) {
        let mut launched: u64 = 0;
        while self.source.peek() {
            if self.tx.is_closed() {
                debug!(runner = %self.label, run_id = %self.run_id, "run discarded, no further pulls");
                break;
            }
            let permit = self.capacity.acquire().await;
            if self.tx.is_closed() {
                break;
            }
            let pulled = std::panic::catch_unwind(AssertUnwindSafe(|| self.source.pull()))
                .unwrap_or_else(|panic| {
                    Err(TaskPoolError::Source(format!(
                        "task source panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                });
            match pulled {
                Ok(Some(task)) => {
                    launched += 1;
                    self.launch(task, permit);
                }
                Ok(None) => break,
                Err(err) => {
                    error!(
                        runner = %self.label,
                        run_id = %self.run_id,
                        launched,
                        error = %err,
                        "task source failed, no further tasks will be pulled"
                    );
                    *self.failure.lock() = Some(err);
                    break;
                }
            }
        }
        debug!(runner = %self.label, run_id = %self.run_id, launched, "task source drained");
        // Dropping `self.tx` here lets the run end once in-flight tasks report.
    }

    fn launch(&self, task: Task<T>, permit: CapacityPermit) {
        let (identity, thunk) = task.into_parts();
        let tx = self.tx.clone();
        let label = self.label.clone();
        debug!(runner = %label, task = %identity, "task launched");

        self.spawner.spawn(async move {
            let reporter = ProgressReporter::new(identity.clone(), tx.clone());
            let outcome = AssertUnwindSafe(thunk.invoke(reporter)).catch_unwind().await;
            drop(permit);

            let envelope = match outcome {
                Ok(Ok(value)) => {
                    debug!(runner = %label, task = %identity, "task completed");
                    ProgressEnvelope::Final {
                        task_identity: identity,
                        value,
                    }
                }
                Ok(Err(err)) => {
                    let error_detail = format!("{err:#}");
                    warn!(runner = %label, task = %identity, error = %error_detail, "task failed");
                    ProgressEnvelope::Error {
                        task_identity: identity,
                        error_detail,
                    }
                }
                Err(panic) => {
                    let error_detail = format!("task panicked: {}", panic_message(panic.as_ref()));
                    error!(runner = %label, task = %identity, error = %error_detail, "task panicked");
                    ProgressEnvelope::Error {
                        task_identity: identity,
                        error_detail,
                    }
                }
            };
            // The run may have been discarded; the outcome is simply unobserved.
            let _ = tx.send(envelope);
        });
    }
}

/// Aggregate counts for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Tasks that produced a `Final` envelope.
    pub completed: u64,
    /// Tasks that produced an `Error` envelope.
    pub failed: u64,
    /// `Intermediate` envelopes observed.
    pub intermediate: u64,
    /// Whether the source failed before it was exhausted.
    pub runner_failed: bool,
}

impl RunSummary {
    fn record<T>(&mut self, envelope: &ProgressEnvelope<T>) {
        match envelope {
            ProgressEnvelope::Final { .. } => self.completed += 1,
            ProgressEnvelope::Error { .. } => self.failed += 1,
            ProgressEnvelope::Intermediate { .. } => self.intermediate += 1,
        }
    }

    /// Tasks that reached a terminal envelope.
    pub const fn finished(&self) -> u64 {
        self.completed + self.failed
    }

    /// True when every task completed and the source did not fail.
    pub const fn all_succeeded(&self) -> bool {
        self.failed == 0 && !self.runner_failed
    }
}

/// Live stream of envelopes for one run.
///
/// Yields `Ok(envelope)` in completion order. If the source failed, a single
/// `Err` is yielded after every launched task has reported, then the stream ends.
pub struct TaskRun<T> {
    label: String,
    run_id: Uuid,
    rx: UnboundedReceiver<ProgressEnvelope<T>>,
    failure: Arc<Mutex<Option<TaskPoolError>>>,
    summary: RunSummary,
    finished: bool,
}

impl<T> TaskRun<T> {
    /// Label of the runner that produced this run.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Random id for log correlation. Not part of any task identity.
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Counts of envelopes observed so far.
    pub const fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Drain the run into a [`RunReport`].
    pub async fn into_report(mut self) -> RunReport<T> {
        let mut envelopes = Vec::new();
        let mut runner_error = None;
        while let Some(item) = self.next().await {
            match item {
                Ok(envelope) => envelopes.push(envelope),
                Err(err) => runner_error = Some(err),
            }
        }
        RunReport {
            envelopes,
            summary: self.summary,
            runner_error,
        }
    }
}

impl<T> Stream for TaskRun<T> {
    type Item = Result<ProgressEnvelope<T>, TaskPoolError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(envelope)) => {
                this.summary.record(&envelope);
                Poll::Ready(Some(Ok(envelope)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                let failure = this.failure.lock().take();
                this.summary.runner_failed = failure.is_some();
                info!(
                    runner = %this.label,
                    run_id = %this.run_id,
                    completed = this.summary.completed,
                    failed = this.summary.failed,
                    runner_failed = this.summary.runner_failed,
                    "task run finished"
                );
                Poll::Ready(failure.map(Err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Everything a drained run produced.
#[derive(Debug)]
pub struct RunReport<T> {
    /// Envelopes in completion order.
    pub envelopes: Vec<ProgressEnvelope<T>>,
    /// Aggregate counts.
    pub summary: RunSummary,
    /// Run-level failure, if the source failed.
    pub runner_error: Option<TaskPoolError>,
}

impl<T> RunReport<T> {
    /// Successful results in completion order.
    pub fn finals(&self) -> impl Iterator<Item = (&TaskIdentity, &T)> {
        self.envelopes.iter().filter_map(|envelope| match envelope {
            ProgressEnvelope::Final {
                task_identity,
                value,
            } => Some((task_identity, value)),
            _ => None,
        })
    }

    /// Failures in completion order.
    pub fn errors(&self) -> impl Iterator<Item = (&TaskIdentity, &str)> {
        self.envelopes.iter().filter_map(|envelope| match envelope {
            ProgressEnvelope::Error {
                task_identity,
                error_detail,
            } => Some((task_identity, error_detail.as_str())),
            _ => None,
        })
    }
}
