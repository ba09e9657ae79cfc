//! Processor - 1 件分の処理（reap → claim → run → resolve）
//!
//! worker loop や CLI の `process` は、すべてこの `process_next` を呼びます。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{JobId, JobRecord, JobStatus, SpoolError, WorkerId};
use crate::ports::ExternalOperation;

use super::claim::{ClaimManager, ClaimResult};
use super::reaper_loop::StaleLockReaper;
use super::resolver::OutcomeResolver;
use super::runner::ExecutionRunner;

/// How the claimed job should be executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    #[default]
    Normal,
    /// Run the forced-failure operation instead of the real one (testing hook).
    ForceFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&JobRecord> for OutcomeSummary {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            next_retry_at: job.next_retry_at,
            error_message: job.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessResult {
    /// No eligible job.
    Idle,
    Processed(OutcomeSummary),
}

pub struct Processor {
    claims: ClaimManager,
    runner: ExecutionRunner,
    resolver: OutcomeResolver,
    reaper: Option<Arc<StaleLockReaper>>,
    operation: Arc<dyn ExternalOperation>,
    forced_failure: Arc<dyn ExternalOperation>,
}

impl Processor {
    pub fn new(
        claims: ClaimManager,
        runner: ExecutionRunner,
        resolver: OutcomeResolver,
        operation: Arc<dyn ExternalOperation>,
        forced_failure: Arc<dyn ExternalOperation>,
    ) -> Self {
        Self {
            claims,
            runner,
            resolver,
            reaper: None,
            operation,
            forced_failure,
        }
    }

    /// Reclaim stale locks before every claim attempt.
    pub fn reap_before_claim(mut self, reaper: Arc<StaleLockReaper>) -> Self {
        self.reaper = Some(reaper);
        self
    }

    pub async fn process_next(
        &self,
        worker: &WorkerId,
        trigger: Trigger,
    ) -> Result<ProcessResult, SpoolError> {
        if let Some(reaper) = &self.reaper {
            reaper.reap().await?;
        }

        let job = match self.claims.claim(worker).await? {
            ClaimResult::Claimed(job) => job,
            ClaimResult::NothingEligible => return Ok(ProcessResult::Idle),
        };

        let operation = match trigger {
            Trigger::Normal => Arc::clone(&self.operation),
            Trigger::ForceFailure => Arc::clone(&self.forced_failure),
        };
        let outcome = self.runner.run(operation, &job).await;
        let stored = self.resolver.resolve(&job, outcome).await?;

        Ok(ProcessResult::Processed(OutcomeSummary::from(&stored)))
    }
}
