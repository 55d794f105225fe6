//! Error types for scheduling.

use thiserror::Error;

use fabriq_core::MicroError;

/// Result type for scheduler operations and jobs.
pub type TaskResult<T> = Result<T, TaskError>;

/// Errors raised by the scheduler or returned by jobs.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The interval string could not be parsed.
    #[error("invalid interval {interval:?}: {reason}")]
    InvalidInterval {
        /// The rejected input.
        interval: String,
        /// Why it was rejected.
        reason: String,
    },

    /// `start_async` was called on a running scheduler.
    #[error("scheduler already running")]
    AlreadyRunning,

    /// No job with the given id.
    #[error("job not found: {0}")]
    NotFound(String),

    /// A job run failed.
    #[error("job failed: {0}")]
    Failed(String),
}

impl TaskError {
    /// Creates an invalid interval error.
    pub fn invalid_interval(interval: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInterval {
            interval: interval.into(),
            reason: reason.into(),
        }
    }

    /// Creates a job failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

impl From<TaskError> for MicroError {
    fn from(err: TaskError) -> Self {
        MicroError::technical("scheduler", err.to_string())
    }
}
