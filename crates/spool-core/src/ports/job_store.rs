//! JobStore port - the durable table of job records.
//!
//! Stores only provide atomic primitives. Deciding *which* transition to make
//! is done by the app layer on plain `JobRecord` values; the store then writes
//! the new value with a compare-and-set.
//!
//! Implementations:
//! - `impls::memory::InMemoryJobStore` (single mutex)
//! - `impls::sqlite::SqliteJobStore` (single-statement conditional updates)

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{IdempotencyKey, JobId, JobRecord, JobStatus, LockGuard, SpoolError, WorkerId};
use crate::observability::JobCounts;

/// Result of `insert_unless_active`.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(JobRecord),

    /// Another job with the same key is pending/processing; nothing was written.
    Existing(JobRecord),
}

/// The precondition a compare-and-set checks against the stored row.
#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    /// Row is processing and still carries exactly this lock.
    Locked(LockGuard),

    /// Row has not been touched since it was read in this status.
    Unchanged {
        status: JobStatus,
        updated_at: DateTime<Utc>,
    },
}

impl Expectation {
    pub fn matches(&self, current: &JobRecord) -> bool {
        match self {
            Expectation::Locked(guard) => current.holds(guard),
            Expectation::Unchanged { status, updated_at } => {
                current.status == *status && current.updated_at == *updated_at
            }
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert `job` unless an active job with the same idempotency key exists.
    ///
    /// This is the actual dedup guarantee under concurrent submissions.
    async fn insert_unless_active(&self, job: JobRecord) -> Result<InsertOutcome, SpoolError>;

    async fn find_active_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<JobRecord>, SpoolError>;

    /// Most recently created job for the key, in any status.
    async fn find_latest_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<JobRecord>, SpoolError>;

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, SpoolError>;

    /// Atomically claim the oldest eligible job for `worker`.
    ///
    /// `Ok(None)` means nothing was eligible or another worker won the race.
    async fn claim_next(
        &self,
        worker: WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, SpoolError>;

    /// Processing jobs whose lock is older than their own timeout.
    async fn find_stale(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>, SpoolError>;

    /// Replace the row `next.id` with `next` iff `expect` still holds.
    ///
    /// Returns `false` (and writes nothing) when the precondition failed or the
    /// write would give the key a second active job.
    async fn compare_and_set(
        &self,
        expect: &Expectation,
        next: &JobRecord,
    ) -> Result<bool, SpoolError>;

    async fn counts(&self) -> Result<JobCounts, SpoolError>;
}
