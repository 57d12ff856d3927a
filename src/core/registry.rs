//! Idempotent, resumable units of work.
//!
//! The registry maps each [`TaskIdentity`] to exactly one [`RunnableUnit`].
//! Resolving an identity that is already known returns the same unit whatever
//! its state, and never builds or runs the work again. With an
//! [`IdentityStore`] attached, terminal outcomes survive a process restart:
//! resolving a completed identity after a restart yields the stored result.
//!
//! Unit lifecycle: `Pending -> Running -> Completed | Failed`. Terminal states
//! are sticky. Retrying a failed unit means minting a new identity, e.g. with
//! [`TaskIdentity::retry`].

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::core::task::panic_message;
use crate::core::{
    ProgressReporter, Task, TaskDescriptor, TaskIdentity, TaskPoolError, TaskSource, Thunk,
    WorkExecutor,
};

/// Lifecycle state of a [`RunnableUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Created, not yet picked up.
    Pending,
    /// Executing.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl UnitState {
    /// Whether the state is `Completed` or `Failed`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Terminal outcome of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOutcome<T> {
    /// Result of a successful execution.
    Completed(T),
    /// Rendered error of a failed execution.
    Failed(String),
}

impl<T> UnitOutcome<T> {
    /// State this outcome settles a unit in.
    pub const fn state(&self) -> UnitState {
        match self {
            Self::Completed(_) => UnitState::Completed,
            Self::Failed(_) => UnitState::Failed,
        }
    }

    /// Convert into a result, turning the failure text back into an error.
    ///
    /// # Errors
    ///
    /// Returns the recorded failure for a `Failed` outcome.
    pub fn into_result(self) -> anyhow::Result<T> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Failed(detail) => Err(anyhow::anyhow!(detail)),
        }
    }
}

/// Persisted view of a unit, as kept by an [`IdentityStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize"))]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned"))]
pub struct UnitRecord<T> {
    /// State at the time of the write.
    pub state: UnitState,
    /// Present iff `state` is `Completed`.
    pub result: Option<T>,
    /// Present iff `state` is `Failed`.
    pub error: Option<String>,
}

impl<T> UnitRecord<T> {
    /// Record for a non-terminal state.
    pub const fn in_progress(state: UnitState) -> Self {
        Self {
            state,
            result: None,
            error: None,
        }
    }

    /// Record for a terminal outcome.
    pub fn settled(outcome: UnitOutcome<T>) -> Self {
        match outcome {
            UnitOutcome::Completed(value) => Self {
                state: UnitState::Completed,
                result: Some(value),
                error: None,
            },
            UnitOutcome::Failed(detail) => Self {
                state: UnitState::Failed,
                result: None,
                error: Some(detail),
            },
        }
    }

    /// Terminal outcome held by this record, if any.
    ///
    /// # Errors
    ///
    /// Returns [`TaskPoolError::Store`] for a completed record with no result.
    pub fn into_outcome(self) -> Result<Option<UnitOutcome<T>>, TaskPoolError> {
        match self.state {
            UnitState::Pending | UnitState::Running => Ok(None),
            UnitState::Completed => self
                .result
                .map(|value| Some(UnitOutcome::Completed(value)))
                .ok_or_else(|| TaskPoolError::Store("completed record has no result".into())),
            UnitState::Failed => Ok(Some(UnitOutcome::Failed(
                self.error.unwrap_or_else(|| "unknown failure".into()),
            ))),
        }
    }
}

/// Durable key-value store of unit records.
///
/// Optional: without one, identities live only as long as the registry.
///
/// Both methods are called synchronously from async code: `get` while the
/// registry lock is held during resolution, `put` on every state change of a
/// unit, inside the runner's driver and task futures. Implementations should
/// return quickly; a backend doing slow or networked I/O should buffer writes
/// and flush them on a thread of its own.
pub trait IdentityStore<T>: Send {
    /// Look up the last record written for `identity`.
    ///
    /// # Errors
    ///
    /// Backend failures are reported as [`TaskPoolError::Store`].
    fn get(&self, identity: &TaskIdentity) -> Result<Option<UnitRecord<T>>, TaskPoolError>;

    /// Write the current record for `identity`, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// Backend failures are reported as [`TaskPoolError::Store`].
    fn put(&mut self, identity: &TaskIdentity, record: UnitRecord<T>) -> Result<(), TaskPoolError>;
}

/// A store shared behind a lock, so the caller keeps a handle to it after
/// handing a clone to a registry.
impl<T, S> IdentityStore<T> for Arc<Mutex<S>>
where
    S: IdentityStore<T> + ?Sized,
{
    fn get(&self, identity: &TaskIdentity) -> Result<Option<UnitRecord<T>>, TaskPoolError> {
        self.lock().get(identity)
    }

    fn put(&mut self, identity: &TaskIdentity, record: UnitRecord<T>) -> Result<(), TaskPoolError> {
        self.lock().put(identity, record)
    }
}

type SharedStore<T> = Arc<Mutex<Box<dyn IdentityStore<T>>>>;

struct UnitInner<T> {
    state: UnitState,
    thunk: Option<Thunk<T>>,
    outcome: Option<UnitOutcome<T>>,
}

enum Claim<T> {
    Run(Thunk<T>),
    Attach,
    Settled(UnitOutcome<T>),
}

/// The single instance of work behind an identity.
pub struct RunnableUnit<T> {
    identity: TaskIdentity,
    inner: Mutex<UnitInner<T>>,
    /// Mirrors `inner.state` for async waiters.
    state_tx: watch::Sender<UnitState>,
    store: Option<SharedStore<T>>,
}

impl<T> RunnableUnit<T>
where
    T: Clone + Send + 'static,
{
    fn pending(identity: TaskIdentity, thunk: Thunk<T>, store: Option<SharedStore<T>>) -> Self {
        Self {
            identity,
            inner: Mutex::new(UnitInner {
                state: UnitState::Pending,
                thunk: Some(thunk),
                outcome: None,
            }),
            state_tx: watch::Sender::new(UnitState::Pending),
            store,
        }
    }

    fn restored(identity: TaskIdentity, outcome: UnitOutcome<T>, store: Option<SharedStore<T>>) -> Self {
        let state = outcome.state();
        Self {
            identity,
            inner: Mutex::new(UnitInner {
                state,
                thunk: None,
                outcome: Some(outcome),
            }),
            state_tx: watch::Sender::new(state),
            store,
        }
    }

    /// Identity of this unit.
    pub const fn identity(&self) -> &TaskIdentity {
        &self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> UnitState {
        self.inner.lock().state
    }

    /// Terminal outcome, once settled.
    pub fn outcome(&self) -> Option<UnitOutcome<T>> {
        self.inner.lock().outcome.clone()
    }

    /// Wait until the unit settles and return its outcome.
    ///
    /// This does not start the unit; something must execute it.
    pub async fn wait(&self) -> UnitOutcome<T> {
        let mut rx = self.state_tx.subscribe();
        // The sender is owned by `self`, so this only returns once settled.
        let _ = rx.wait_for(|state| state.is_terminal()).await;
        self.outcome()
            .unwrap_or_else(|| UnitOutcome::Failed("unit state channel closed".into()))
    }

    /// Execute the unit once, or observe the execution that already happened.
    ///
    /// A `Pending` unit runs its work. A `Running` unit is attached to: the call
    /// waits for the execution in progress. A settled unit returns its retained
    /// outcome without running anything.
    pub async fn execute(&self, reporter: ProgressReporter<T>) -> UnitOutcome<T> {
        let claim = {
            let mut inner = self.inner.lock();
            match inner.state {
                UnitState::Pending => match inner.thunk.take() {
                    Some(thunk) => {
                        inner.state = UnitState::Running;
                        self.state_tx.send_replace(UnitState::Running);
                        Claim::Run(thunk)
                    }
                    None => Claim::Settled(UnitOutcome::Failed("unit has no work".into())),
                },
                UnitState::Running => Claim::Attach,
                UnitState::Completed | UnitState::Failed => match inner.outcome.clone() {
                    Some(outcome) => Claim::Settled(outcome),
                    None => Claim::Attach,
                },
            }
        };

        match claim {
            Claim::Settled(outcome) => {
                debug!(unit = %self.identity, state = ?outcome.state(), "unit already settled, reusing outcome");
                outcome
            }
            Claim::Attach => {
                debug!(unit = %self.identity, "unit running elsewhere, attaching");
                self.wait().await
            }
            Claim::Run(thunk) => {
                debug!(unit = %self.identity, "unit running");
                self.persist(UnitRecord::in_progress(UnitState::Running));
                let outcome = match AssertUnwindSafe(thunk.invoke(reporter)).catch_unwind().await {
                    Ok(Ok(value)) => UnitOutcome::Completed(value),
                    Ok(Err(err)) => UnitOutcome::Failed(format!("{err:#}")),
                    Err(panic) => {
                        UnitOutcome::Failed(format!("task panicked: {}", panic_message(panic.as_ref())))
                    }
                };
                self.settle(outcome.clone());
                outcome
            }
        }
    }

    /// Task that executes (or attaches to) this unit when launched by a runner.
    pub fn to_task(self: &Arc<Self>) -> Task<T> {
        let unit = Arc::clone(self);
        Task::with_progress(self.identity.clone(), move |reporter| async move {
            unit.execute(reporter).await.into_result()
        })
    }

    fn settle(&self, outcome: UnitOutcome<T>) {
        let state = outcome.state();
        {
            let mut inner = self.inner.lock();
            inner.state = state;
            inner.outcome = Some(outcome.clone());
        }
        self.state_tx.send_replace(state);
        match state {
            UnitState::Failed => warn!(unit = %self.identity, "unit failed"),
            _ => debug!(unit = %self.identity, "unit completed"),
        }
        self.persist(UnitRecord::settled(outcome));
    }

    fn persist(&self, record: UnitRecord<T>) {
        if let Some(store) = &self.store {
            if let Err(e) = store.lock().put(&self.identity, record) {
                error!(unit = %self.identity, error = %e, "failed to persist unit record");
            }
        }
    }
}

impl<T> fmt::Debug for RunnableUnit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnableUnit")
            .field("identity", &self.identity)
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

struct RegistryInner<T> {
    units: Mutex<HashMap<TaskIdentity, Arc<RunnableUnit<T>>>>,
    store: Option<SharedStore<T>>,
}

/// At-most-one unit per identity, optionally backed by durable storage.
///
/// Cloning is cheap and shares the same registry.
pub struct IdempotentTaskRegistry<T> {
    inner: Arc<RegistryInner<T>>,
}

impl<T> Clone for IdempotentTaskRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for IdempotentTaskRegistry<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IdempotentTaskRegistry<T>
where
    T: Clone + Send + 'static,
{
    /// In-memory registry scoped to this process.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Registry that restores and persists unit records through `store`.
    pub fn with_store(store: impl IdentityStore<T> + 'static) -> Self {
        let store: Box<dyn IdentityStore<T>> = Box::new(store);
        Self::build(Some(Arc::new(Mutex::new(store))))
    }

    fn build(store: Option<SharedStore<T>>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                units: Mutex::new(HashMap::new()),
                store,
            }),
        }
    }

    /// Return the unit for `identity`, building it only if the identity is unseen.
    ///
    /// `build` is called at most once per identity for the lifetime of the
    /// registry, and not at all when a terminal record is restored from the
    /// store. Records left `Pending` or `Running` by an interrupted process are
    /// rebuilt fresh. `build` runs under the registry lock and must not call
    /// back into the registry.
    ///
    /// # Errors
    ///
    /// Returns [`TaskPoolError::Store`] if the store lookup fails or holds an
    /// unreadable record.
    pub fn resolve_or_create<F>(
        &self,
        identity: impl Into<TaskIdentity>,
        build: F,
    ) -> Result<Arc<RunnableUnit<T>>, TaskPoolError>
    where
        F: FnOnce() -> Thunk<T>,
    {
        let identity = identity.into();
        let mut units = self.inner.units.lock();
        if let Some(unit) = units.get(&identity) {
            debug!(unit = %identity, state = ?unit.state(), "identity resolved to existing unit");
            return Ok(Arc::clone(unit));
        }

        let store = self.inner.store.clone();
        let record = match &store {
            Some(store) => store.lock().get(&identity)?,
            None => None,
        };
        let interrupted = record.as_ref().map(|r| r.state).filter(|s| !s.is_terminal());
        let restored = record.map(UnitRecord::into_outcome).transpose()?.flatten();

        let unit = if let Some(outcome) = restored {
            info!(unit = %identity, state = ?outcome.state(), "restored settled unit from store");
            RunnableUnit::restored(identity.clone(), outcome, store)
        } else {
            if let Some(state) = interrupted {
                warn!(unit = %identity, ?state, "resuming interrupted unit");
            }
            let unit = RunnableUnit::pending(identity.clone(), build(), store);
            unit.persist(UnitRecord::in_progress(UnitState::Pending));
            debug!(unit = %identity, "unit created");
            unit
        };

        let unit = Arc::new(unit);
        units.insert(identity, Arc::clone(&unit));
        Ok(unit)
    }

    /// Resolve a descriptor, executing its payload through `executor` if new.
    ///
    /// # Errors
    ///
    /// See [`resolve_or_create`](Self::resolve_or_create).
    pub fn resolve_descriptor<P, E>(
        &self,
        descriptor: TaskDescriptor<P>,
        executor: &E,
    ) -> Result<Arc<RunnableUnit<T>>, TaskPoolError>
    where
        P: Send + 'static,
        E: WorkExecutor<P, T>,
    {
        let TaskDescriptor { identity, payload } = descriptor;
        let executor = executor.clone();
        let work_identity = identity.clone();
        self.resolve_or_create(identity, move || {
            Thunk::new(move || async move { executor.execute(payload, work_identity).await })
        })
    }

    /// Lazy task source that resolves each descriptor only when pulled.
    pub fn source<P, I, E>(&self, descriptors: I, executor: E) -> ResolvingSource<T, I::IntoIter, E>
    where
        I: IntoIterator<Item = TaskDescriptor<P>>,
    {
        ResolvingSource {
            registry: self.clone(),
            descriptors: descriptors.into_iter(),
            executor,
            done: false,
        }
    }

    /// Unit for `identity`, if it has been resolved in this registry.
    pub fn get(&self, identity: &TaskIdentity) -> Option<Arc<RunnableUnit<T>>> {
        self.inner.units.lock().get(identity).cloned()
    }

    /// Number of identities resolved so far.
    pub fn len(&self) -> usize {
        self.inner.units.lock().len()
    }

    /// Whether no identity has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Task source mapping descriptors to registry units at pull time.
///
/// Registration happens only when the runner pulls, i.e. once it holds the
/// capacity to start the task.
pub struct ResolvingSource<T, I, E> {
    registry: IdempotentTaskRegistry<T>,
    descriptors: I,
    executor: E,
    done: bool,
}

impl<T, P, I, E> TaskSource<T> for ResolvingSource<T, I, E>
where
    T: Clone + Send + 'static,
    P: Send + 'static,
    I: Iterator<Item = TaskDescriptor<P>> + Send,
    E: WorkExecutor<P, T>,
{
    fn pull(&mut self) -> Result<Option<Task<T>>, TaskPoolError> {
        if self.done {
            return Ok(None);
        }
        let Some(descriptor) = self.descriptors.next() else {
            self.done = true;
            return Ok(None);
        };
        match self.registry.resolve_descriptor(descriptor, &self.executor) {
            Ok(unit) => Ok(Some(unit.to_task())),
            Err(err) => {
                self.done = true;
                Err(err)
            }
        }
    }

    fn peek(&self) -> bool {
        !self.done
    }
}
