//! ExternalOperation port - the black-box call a job performs.
//!
//! The core only defines how the outcome is interpreted; latency and
//! availability of the operation are outside its control.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::JobId;

/// What the operation receives: the payload plus identifiers for tracing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub job_id: JobId,
    pub payload: serde_json::Value,
    pub invoked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    /// The operation answered, but not with a success.
    #[error("operation rejected the request: {0}")]
    Rejected(String),

    /// The call itself failed (transport, crash, bad response...).
    #[error("operation failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait ExternalOperation: Send + Sync {
    async fn invoke(&self, request: OperationRequest) -> Result<serde_json::Value, OperationError>;
}
