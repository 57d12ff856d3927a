//! Host-supplied work execution and task descriptors.

use async_trait::async_trait;
use serde::Serialize;

use crate::core::{TaskIdentity, TaskPoolError};

/// Abstraction for executing a task payload and producing a result.
///
/// The executor holds the actual business logic of a unit of work, e.g.
/// calling an external generation service. The pool never interprets the
/// payload; it only decides when the executor runs.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_task_pool::core::{TaskIdentity, WorkExecutor};
///
/// #[derive(Clone)]
/// struct StoryWriter;
///
/// #[async_trait]
/// impl WorkExecutor<String, String> for StoryWriter {
///     async fn execute(&self, topic: String, identity: TaskIdentity) -> anyhow::Result<String> {
///         Ok(format!("[{identity}] once upon a time, {topic}"))
///     }
/// }
/// ```
#[async_trait]
pub trait WorkExecutor<P, T>: Send + Sync + Clone + 'static
where
    P: Send + 'static,
    T: Send + 'static,
{
    /// Execute a payload and return its result.
    ///
    /// # Arguments
    ///
    /// * `payload` - The payload of the descriptor being executed
    /// * `identity` - Identity of the unit, for logging or downstream naming
    ///
    /// # Errors
    ///
    /// Any error is reported as an `Error` envelope for this task only.
    async fn execute(&self, payload: P, identity: TaskIdentity) -> anyhow::Result<T>;
}

/// Caller-side description of a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor<P> {
    /// Deterministic identity of the work.
    pub identity: TaskIdentity,
    /// Data the executor needs.
    pub payload: P,
}

impl<P> TaskDescriptor<P> {
    /// Descriptor with an identity the caller has already made deterministic.
    pub fn new(identity: impl Into<TaskIdentity>, payload: P) -> Self {
        Self {
            identity: identity.into(),
            payload,
        }
    }

    /// Descriptor whose identity is derived from `topic` and the payload itself.
    ///
    /// # Errors
    ///
    /// Returns [`TaskPoolError::Identity`] if the payload cannot be serialized.
    pub fn derive(topic: &str, payload: P) -> Result<Self, TaskPoolError>
    where
        P: Serialize,
    {
        let identity = TaskIdentity::derive(topic, &payload)?;
        Ok(Self { identity, payload })
    }
}
