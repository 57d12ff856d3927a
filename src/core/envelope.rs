//! Progress envelopes streamed out of a task run.

use serde::{Deserialize, Serialize};

use crate::core::TaskIdentity;

/// Discriminant of a [`ProgressEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Task finished with a result.
    Final,
    /// Task failed.
    Error,
    /// Task reported progress before finishing.
    Intermediate,
}

/// One reported outcome for one task.
///
/// Every launched task produces exactly one `Final` or `Error` envelope, in
/// completion order, optionally preceded by `Intermediate` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEnvelope<T> {
    /// Task completed successfully.
    Final {
        /// Task the result belongs to.
        task_identity: TaskIdentity,
        /// Result value.
        value: T,
    },
    /// Task failed; the rest of the run is unaffected.
    Error {
        /// Task that failed.
        task_identity: TaskIdentity,
        /// Rendered error chain.
        error_detail: String,
    },
    /// Progress update emitted while the task is still running.
    Intermediate {
        /// Task reporting progress.
        task_identity: TaskIdentity,
        /// Progress value.
        value: T,
    },
}

impl<T> ProgressEnvelope<T> {
    /// Identity of the task this envelope belongs to.
    pub const fn task_identity(&self) -> &TaskIdentity {
        match self {
            Self::Final { task_identity, .. }
            | Self::Error { task_identity, .. }
            | Self::Intermediate { task_identity, .. } => task_identity,
        }
    }

    /// Discriminant of this envelope.
    pub const fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Final { .. } => EnvelopeKind::Final,
            Self::Error { .. } => EnvelopeKind::Error,
            Self::Intermediate { .. } => EnvelopeKind::Intermediate,
        }
    }

    /// Whether this envelope ends its task (`Final` or `Error`).
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Intermediate { .. })
    }
}
