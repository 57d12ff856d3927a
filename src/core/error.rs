//! Error types for task pool operations.

use thiserror::Error;

/// Errors produced by capacity, runner, registry and store components.
///
/// Per-task failures are not represented here: they travel as
/// [`ProgressEnvelope::Error`](crate::core::ProgressEnvelope::Error) and never
/// stop a run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskPoolError {
    /// A capacity source was constructed with an unusable budget.
    #[error("invalid capacity: {0}")]
    InvalidCapacity(String),
    /// Configuration failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// The task source failed to produce its next task; remaining work is unknown.
    #[error("task source failed: {0}")]
    Source(String),
    /// Identity store backend failure with context.
    #[error("identity store error: {0}")]
    Store(String),
    /// A task identity could not be derived from its inputs.
    #[error("identity error: {0}")]
    Identity(String),
    /// No pool with the requested name is configured.
    #[error("unknown pool: {0}")]
    UnknownPool(String),
}

impl TaskPoolError {
    /// Build a source failure from any displayable error.
    pub fn source_failure(err: impl std::fmt::Display) -> Self {
        Self::Source(err.to_string())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
