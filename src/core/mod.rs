//! Core capacity, runner and identity abstractions.

pub mod capacity;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod identity;
pub mod registry;
pub mod runner;
pub mod source;
pub mod task;

pub use capacity::{CapacityPermit, CapacitySource};
pub use envelope::{EnvelopeKind, ProgressEnvelope};
pub use error::{AppResult, TaskPoolError};
pub use executor::{TaskDescriptor, WorkExecutor};
pub use identity::TaskIdentity;
pub use registry::{
    IdempotentTaskRegistry, IdentityStore, ResolvingSource, RunnableUnit, UnitOutcome,
    UnitRecord, UnitState,
};
pub use runner::{RunReport, RunSummary, Spawn, TaskPoolRunner, TaskRun};
pub use source::{IterSource, ListSource, TaskSource};
pub use task::{ProgressReporter, Task, Thunk};
