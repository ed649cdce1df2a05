//! Scheduler error types.

use thiserror::Error;

use crate::backup::BackupError;
use crate::store::StorageError;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Recurrence parameters are malformed or out of range.
    #[error("invalid recurrence: {0}")]
    InvalidRecurrence(String),

    /// Job fields violate a constraint.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// Job not found.
    #[error("job not found: {0}")]
    NotFound(String),

    /// No built-in preset with this name.
    #[error("unknown preset: {0}")]
    UnknownPreset(String),

    /// The job set could not be read from or written to storage.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),

    /// The external backup command failed.
    #[error("external command failed: {0}")]
    ExternalCommandFailure(String),
}

impl From<BackupError> for SchedulerError {
    fn from(e: BackupError) -> Self {
        SchedulerError::ExternalCommandFailure(e.to_string())
    }
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
