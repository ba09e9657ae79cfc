//! Errors surfaced to callers of the core.
//!
//! Failures of the external operation are *not* here: they are recorded into
//! the job record (`error_message`) and drive retry / dead-letter instead.

use thiserror::Error;

use super::ids::JobId;

#[derive(Debug, Error)]
pub enum SpoolError {
    /// Empty or malformed submission. Never retried.
    #[error("invalid submission: {0}")]
    Validation(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The job is no longer locked by the caller (e.g. reclaimed by the reaper),
    /// so the outcome was not applied.
    #[error("lock lost for {0}")]
    LockLost(JobId),

    /// Insert / update / select failed at the store.
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SpoolError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

impl From<sqlx::Error> for SpoolError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SpoolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("json: {err}"))
    }
}

impl From<config::ConfigError> for SpoolError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
