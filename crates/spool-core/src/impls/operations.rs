//! Shipped `ExternalOperation` implementations.
//!
//! - **EchoOperation**: returns the payload back (demo / CLI default)
//! - **ForcedFailure**: always fails; the processor swaps it in for `Trigger::ForceFailure`
//! - **FnOperation**: wraps an async closure (tests, embedding)

use std::future::Future;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::ports::{ExternalOperation, OperationError, OperationRequest};

/// error_message recorded for a forced failure.
pub const FORCED_FAILURE_MESSAGE: &str = "forced failure requested";

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoOperation;

#[async_trait]
impl ExternalOperation for EchoOperation {
    async fn invoke(&self, request: OperationRequest) -> Result<Value, OperationError> {
        Ok(json!({
            "echo": request.payload,
            "job_id": request.job_id.to_string(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct ForcedFailure {
    message: String,
}

impl ForcedFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for ForcedFailure {
    fn default() -> Self {
        Self::new(FORCED_FAILURE_MESSAGE)
    }
}

#[async_trait]
impl ExternalOperation for ForcedFailure {
    async fn invoke(&self, _request: OperationRequest) -> Result<Value, OperationError> {
        Err(OperationError::Rejected(self.message.clone()))
    }
}

/// Adapts `Fn(OperationRequest) -> impl Future<Output = Result<Value, OperationError>>`.
pub struct FnOperation<F> {
    f: F,
}

impl<F> FnOperation<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> ExternalOperation for FnOperation<F>
where
    F: Fn(OperationRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, OperationError>> + Send,
{
    async fn invoke(&self, request: OperationRequest) -> Result<Value, OperationError> {
        (self.f)(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobId;
    use crate::domain::job::tests::t0;
    use ulid::Ulid;

    fn request(payload: Value) -> OperationRequest {
        OperationRequest {
            job_id: JobId::from_ulid(Ulid::new()),
            payload,
            invoked_at: t0(),
        }
    }

    #[tokio::test]
    async fn echo_returns_payload_and_id() {
        let req = request(json!({"input": "X"}));
        let id = req.job_id;

        let value = EchoOperation.invoke(req).await.unwrap();

        assert_eq!(value["echo"], json!({"input": "X"}));
        assert_eq!(value["job_id"], json!(id.to_string()));
    }

    #[tokio::test]
    async fn forced_failure_always_fails() {
        let err = ForcedFailure::default()
            .invoke(request(json!(1)))
            .await
            .unwrap_err();
        assert_eq!(err, OperationError::Rejected(FORCED_FAILURE_MESSAGE.into()));
    }

    #[tokio::test]
    async fn fn_operation_calls_closure() {
        let op = FnOperation::new(|req: OperationRequest| async move {
            match req.payload.as_i64() {
                Some(n) => Ok(json!(n * 2)),
                None => Err(OperationError::Failed("not a number".into())),
            }
        });

        assert_eq!(op.invoke(request(json!(21))).await.unwrap(), json!(42));
        assert!(op.invoke(request(json!("x"))).await.is_err());
    }
}
