//! ExecutionRunner - 外部オペレーションの呼び出し
//!
//! 呼び出しは別 task で実行し、panic は `JoinError` として受け取って
//! Failure に畳み込みます。runner 自身はエラーを返しません。

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{ExecutionOutcome, JobRecord};
use crate::ports::{Clock, ExternalOperation, OperationRequest};

pub struct ExecutionRunner {
    clock: Arc<dyn Clock>,
    call_timeout: Option<Duration>,
}

impl ExecutionRunner {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            call_timeout: None,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub async fn run(
        &self,
        operation: Arc<dyn ExternalOperation>,
        job: &JobRecord,
    ) -> ExecutionOutcome {
        let request = OperationRequest {
            job_id: job.id,
            payload: job.payload.clone(),
            invoked_at: self.clock.now(),
        };

        let mut handle = tokio::spawn(async move { operation.invoke(request).await });

        let joined = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    tracing::warn!(job_id = %job.id, ?limit, "operation call timed out");
                    return ExecutionOutcome::failure(format!(
                        "operation timed out after {}ms",
                        limit.as_millis()
                    ));
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(result)) => ExecutionOutcome::success(result),
            Ok(Err(err)) => ExecutionOutcome::failure(err.to_string()),
            Err(err) if err.is_panic() => {
                let message = panic_message(err.into_panic());
                tracing::error!(job_id = %job.id, %message, "operation panicked");
                ExecutionOutcome::failure(format!("operation panicked: {message}"))
            }
            Err(err) => ExecutionOutcome::failure(format!("operation task failed: {err}")),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
