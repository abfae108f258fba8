use thiserror::Error;

use crate::domain::{JobId, JobState};
use crate::queue::Container;

pub type Result<T, E = QueueError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The job is not in the container the operation expected.
    #[error("job {id} not found in {container}")]
    NotFound { id: JobId, container: Container },

    /// State machine violation. The write was refused and nothing changed.
    #[error("job {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("job {id}: `{field}` cannot change after enqueue")]
    ImmutableField { id: JobId, field: &'static str },

    #[error("job {0} already exists")]
    DuplicateJob(JobId),

    #[error("malformed job: {0}")]
    InvalidJob(String),

    /// The backing medium could not be read or written, or held a record
    /// that breaks the job invariants.
    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl QueueError {
    pub(crate) fn persistence(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        QueueError::Persistence(format!("{context}: {err}"))
    }

    /// Faults after which the caller's in-memory view can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueueError::Persistence(_))
    }
}
