//! Task processing status and result types.

use thiserror::Error;

/// Result of processing a single table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Entry processed
    Success,
    /// Entry rejected because its content is invalid; never retried
    InvalidEntry,
    /// Entry failed in the backend; never retried
    Failed,
    /// Entry should be retried later
    NeedRetry,
    /// Entry was ignored (unknown key on delete, etc.)
    Ignore,
}

impl TaskStatus {
    /// Returns true if the entry can be dropped from the queue.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Ignore)
    }

    /// Returns true if the entry should stay queued.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::NeedRetry)
    }

    /// Returns true if the entry failed permanently.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::InvalidEntry | TaskStatus::Failed)
    }
}

/// Error type for generic entry handling failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// A mandatory field is absent
    #[error("Missing field: {field}")]
    MissingField { field: String },

    /// A field is present but cannot be parsed
    #[error("Invalid value for {field}: {value}")]
    InvalidField { field: String, value: String },

    /// The entry key cannot be parsed
    #[error("Invalid key: {key}")]
    InvalidKey { key: String },
}

impl TaskError {
    pub fn missing_field(field: impl Into<String>) -> Self {
        TaskError::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid_field(field: impl Into<String>, value: impl Into<String>) -> Self {
        TaskError::InvalidField {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn invalid_key(key: impl Into<String>) -> Self {
        TaskError::InvalidKey { key: key.into() }
    }

    /// Every variant describes bad input.
    pub fn to_status(&self) -> TaskStatus {
        TaskStatus::InvalidEntry
    }
}

/// Result type for entry field handling.
pub type TaskResult<T> = Result<T, TaskError>;
