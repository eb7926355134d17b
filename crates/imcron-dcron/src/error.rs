//! Error types for the distributed cron scheduler.

use thiserror::Error;

/// Errors that can occur in the scheduler, its driver or its job store.
#[derive(Debug, Error)]
pub enum DcronError {
    /// A job with the same name is already registered.
    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    /// The component was started twice.
    #[error("{0} is already started")]
    AlreadyStarted(&'static str),

    /// The scheduler was stopped and cannot be started again.
    #[error("Dcron has been stopped")]
    Stopped,

    /// Invalid cron expression.
    #[error("Invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },

    /// Ownership cannot be decided while membership is converging.
    #[error("Node pool is upgrading")]
    Upgrading,

    /// Backing store command failed.
    #[error("Store error during {op} on '{key}': {source}")]
    Store {
        op: &'static str,
        key: String,
        #[source]
        source: redis::RedisError,
    },

    /// Backing store command did not answer in time.
    #[error("Store timed out during {op} on '{key}'")]
    Timeout { op: &'static str, key: String },

    /// Backing store is unreachable (in-memory registry outage).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Persisted job could not be turned back into a job.
    #[error("Failed to recover job '{name}': {reason}")]
    Recover { name: String, reason: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DcronError {
    /// Whether this error is the "cluster still converging" denial.
    pub fn is_upgrading(&self) -> bool {
        matches!(self, DcronError::Upgrading)
    }
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, DcronError>;
