//! Job record and its state machine.
//!
//! State transitions:
//! - Pending -> Processing (claim)
//! - Failed -> Processing (claim, once next_retry_at has passed)
//! - Processing -> Completed | Failed | DeadLetter (outcome)
//! - Processing -> Pending | DeadLetter (stale lock reclaimed)
//!
//! All transitions are methods on `JobRecord`; they only mutate the in-memory
//! value. Stores persist the result with a compare-and-set.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::idempotency::IdempotencyKey;
use super::ids::{JobId, WorkerId};
use super::retry::{RetryPolicy, add_saturating};

/// error_message recorded when a stale job is put back to pending.
pub const TIMED_OUT_WILL_RETRY: &str = "timed out, will retry";

/// error_message recorded when a stale job has no retries left.
pub const TIMED_OUT_DEAD: &str = "timed out after maximum retries";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Pending,

    /// Claimed by a worker (lock held).
    Processing,

    /// Finished successfully; result is set.
    Completed,

    /// Failed, will become claimable again at next_retry_at.
    Failed,

    /// Retries exhausted. Kept for inspection, never reclaimed.
    DeadLetter,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::DeadLetter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::DeadLetter => "dead_letter",
        }
    }

    /// Idempotency keys are unique among active jobs.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::DeadLetter)
    }

    pub fn is_claimable(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Per-job limits fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLimits {
    pub max_retries: u32,
    pub timeout_seconds: u64,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_seconds: 600,
        }
    }
}

/// The lock a worker holds on a processing job.
///
/// Outcome writes are only applied while the stored row still carries exactly
/// this lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    pub worker: WorkerId,
    pub locked_at: DateTime<Utc>,
}

/// The sole persisted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub idempotency_key: IdempotencyKey,
    pub submitter: Option<String>,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,

    /// Attempts made so far (never above max_retries).
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub timeout_seconds: u64,

    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<WorkerId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A freshly submitted job.
    pub fn pending(
        id: JobId,
        idempotency_key: IdempotencyKey,
        payload: serde_json::Value,
        submitter: Option<String>,
        limits: JobLimits,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            idempotency_key,
            submitter,
            payload,
            status: JobStatus::Pending,
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries: limits.max_retries,
            next_retry_at: None,
            timeout_seconds: limits.timeout_seconds,
            locked_at: None,
            locked_by: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Can a worker claim this job at `now`?
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable()
            && self.locked_at.is_none()
            && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Has the lock outlived this job's own timeout?
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.locked_at) {
            (JobStatus::Processing, Some(locked_at)) => {
                add_saturating(locked_at, Duration::from_secs(self.timeout_seconds)) < now
            }
            _ => false,
        }
    }

    pub fn lock_guard(&self) -> Option<LockGuard> {
        if self.status != JobStatus::Processing {
            return None;
        }
        let worker = self.locked_by?;
        let locked_at = self.locked_at?;
        Some(LockGuard { worker, locked_at })
    }

    pub fn holds(&self, guard: &LockGuard) -> bool {
        self.status == JobStatus::Processing
            && self.locked_by == Some(guard.worker)
            && self.locked_at == Some(guard.locked_at)
    }

    pub fn claim(&mut self, worker: WorkerId, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.locked_at = Some(now);
        self.locked_by = Some(worker);
        self.error_message = None;
        self.next_retry_at = None;
        self.updated_at = now;
    }

    pub fn resolve_success(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.error_message = None;
        self.next_retry_at = None;
        self.completed_at = Some(now);
        self.clear_lock();
        self.updated_at = now;
    }

    /// Record a failed attempt; returns the resulting status
    /// (`Failed` with a retry scheduled, or `DeadLetter`).
    pub fn resolve_failure(
        &mut self,
        message: impl Into<String>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> JobStatus {
        self.retry_count = self.retry_count.saturating_add(1).min(self.max_retries);
        self.error_message = Some(message.into());
        self.result = None;
        self.clear_lock();
        self.updated_at = now;

        if self.retry_count >= self.max_retries {
            self.status = JobStatus::DeadLetter;
            self.next_retry_at = None;
            self.completed_at = Some(now);
        } else {
            self.status = JobStatus::Failed;
            self.next_retry_at = Some(policy.next_retry_at(self.retry_count, now));
        }
        self.status
    }

    /// Reclaim an abandoned lock; returns `Pending` or `DeadLetter`.
    pub fn release_stale(&mut self, policy: &RetryPolicy, now: DateTime<Utc>) -> JobStatus {
        self.clear_lock();
        self.updated_at = now;

        if self.retry_count >= self.max_retries {
            self.status = JobStatus::DeadLetter;
            self.error_message = Some(TIMED_OUT_DEAD.to_string());
            self.next_retry_at = None;
            self.completed_at = Some(now);
        } else {
            self.retry_count += 1;
            self.status = JobStatus::Pending;
            self.error_message = Some(TIMED_OUT_WILL_RETRY.to_string());
            self.next_retry_at = Some(policy.next_retry_at(self.retry_count, now));
        }
        self.status
    }

    /// Put a finished row back to a fresh pending state (resubmission reuse).
    pub fn reset_for_resubmit(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.result = None;
        self.error_message = None;
        self.retry_count = 0;
        self.next_retry_at = None;
        self.completed_at = None;
        self.clear_lock();
        self.updated_at = now;
    }

    fn clear_lock(&mut self) {
        self.locked_at = None;
        self.locked_by = None;
    }

    /// Names of the record invariants this value violates (empty when sound).
    pub fn check_invariants(&self) -> Vec<&'static str> {
        let mut violations = Vec::new();
        let processing = self.status == JobStatus::Processing;

        if self.locked_at.is_some() != self.locked_by.is_some() {
            violations.push("locked_at and locked_by must be set together");
        }
        if processing != self.locked_at.is_some() {
            violations.push("processing iff locked");
        }
        let completed = self.status == JobStatus::Completed;
        if completed != (self.result.is_some() && self.completed_at.is_some()) {
            violations.push("completed iff result and completed_at");
        }
        if completed && self.error_message.is_some() {
            violations.push("completed jobs carry no error");
        }
        if matches!(self.status, JobStatus::Failed | JobStatus::DeadLetter)
            && self.error_message.is_none()
        {
            violations.push("failed and dead-lettered jobs carry an error");
        }
        if self.retry_count > self.max_retries {
            violations.push("retry_count within max_retries");
        }
        if self.status == JobStatus::DeadLetter && self.next_retry_at.is_some() {
            violations.push("dead-lettered jobs are never rescheduled");
        }
        violations
    }
}
