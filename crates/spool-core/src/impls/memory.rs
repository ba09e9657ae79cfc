//! In-memory job store.
//!
//! Every operation runs under one `tokio::sync::Mutex`, so select-then-update
//! is atomic by construction. Not durable; meant for tests, demos and
//! single-process embedding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::domain::{IdempotencyKey, JobId, JobRecord, SpoolError, WorkerId};
use crate::observability::JobCounts;
use crate::ports::{Expectation, InsertOutcome, JobStore};

/// A record plus its insertion sequence (tie-breaker for equal created_at).
#[derive(Debug, Clone)]
struct StoredJob {
    seq: u64,
    record: JobRecord,
}

#[derive(Default)]
struct InMemoryState {
    jobs: HashMap<JobId, StoredJob>,
    next_seq: u64,
}

impl InMemoryState {
    fn active_for_key(&self, key: &IdempotencyKey) -> Option<&StoredJob> {
        self.jobs
            .values()
            .find(|job| job.record.idempotency_key == *key && job.record.status.is_active())
    }

    /// Whether another row holding the same key is pending or processing.
    fn key_held_elsewhere(&self, job: &JobRecord) -> bool {
        self.jobs.values().any(|other| {
            other.record.id != job.id
                && other.record.idempotency_key == job.idempotency_key
                && other.record.status.is_active()
        })
    }

    fn oldest<'a>(jobs: impl Iterator<Item = &'a StoredJob>) -> Option<&'a StoredJob> {
        jobs.min_by_key(|job| (job.record.created_at, job.seq))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    state: Arc<Mutex<InMemoryState>>,
    notify: Arc<Notify>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signalled whenever a job may have become claimable.
    ///
    /// Workers may wait on it instead of sleeping a full poll interval.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// All records, oldest first (for inspection and tests).
    pub async fn snapshot(&self) -> Vec<JobRecord> {
        let state = self.state.lock().await;
        let mut jobs: Vec<&StoredJob> = state.jobs.values().collect();
        jobs.sort_by_key(|job| (job.record.created_at, job.seq));
        jobs.into_iter().map(|job| job.record.clone()).collect()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert_unless_active(&self, job: JobRecord) -> Result<InsertOutcome, SpoolError> {
        let outcome = {
            let mut state = self.state.lock().await;
            if let Some(existing) = state.active_for_key(&job.idempotency_key) {
                InsertOutcome::Existing(existing.record.clone())
            } else if state.jobs.contains_key(&job.id) {
                return Err(SpoolError::storage(format!("duplicate job id {}", job.id)));
            } else {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.jobs.insert(
                    job.id,
                    StoredJob {
                        seq,
                        record: job.clone(),
                    },
                );
                InsertOutcome::Inserted(job)
            }
        };

        if matches!(outcome, InsertOutcome::Inserted(_)) {
            self.notify.notify_one();
        }
        Ok(outcome)
    }

    async fn find_active_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<JobRecord>, SpoolError> {
        let state = self.state.lock().await;
        Ok(state.active_for_key(key).map(|job| job.record.clone()))
    }

    async fn find_latest_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<JobRecord>, SpoolError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| job.record.idempotency_key == *key)
            .max_by_key(|job| (job.record.created_at, job.seq))
            .map(|job| job.record.clone()))
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, SpoolError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&id).map(|job| job.record.clone()))
    }

    async fn claim_next(
        &self,
        worker: WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, SpoolError> {
        let mut state = self.state.lock().await;

        let Some(id) = InMemoryState::oldest(state.jobs.values().filter(|job| {
            job.record.is_eligible(now) && !state.key_held_elsewhere(&job.record)
        }))
        .map(|job| job.record.id) else {
            return Ok(None);
        };

        // 同じロックの中で再確認してから更新する
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        if !job.record.is_eligible(now) {
            return Ok(None);
        }
        job.record.claim(worker, now);
        Ok(Some(job.record.clone()))
    }

    async fn find_stale(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>, SpoolError> {
        let state = self.state.lock().await;
        let mut stale: Vec<&StoredJob> = state
            .jobs
            .values()
            .filter(|job| job.record.is_stale(now))
            .collect();
        stale.sort_by_key(|job| (job.record.locked_at, job.seq));
        Ok(stale.into_iter().map(|job| job.record.clone()).collect())
    }

    async fn compare_and_set(
        &self,
        expect: &Expectation,
        next: &JobRecord,
    ) -> Result<bool, SpoolError> {
        let applied = {
            let mut state = self.state.lock().await;

            // only an inactive -> active move can collide; releasing a lock never does
            let reactivating = next.status.is_active()
                && state
                    .jobs
                    .get(&next.id)
                    .is_some_and(|current| !current.record.status.is_active());
            let key_taken = reactivating && state.key_held_elsewhere(next);

            match state.jobs.get_mut(&next.id) {
                Some(current) if !key_taken && expect.matches(&current.record) => {
                    current.record = next.clone();
                    true
                }
                _ => false,
            }
        };

        if applied && next.status.is_claimable() {
            self.notify.notify_one();
        }
        Ok(applied)
    }

    async fn counts(&self) -> Result<JobCounts, SpoolError> {
        let state = self.state.lock().await;
        let mut counts = JobCounts::default();
        for job in state.jobs.values() {
            counts.record(job.record.status);
        }
        Ok(counts)
    }
}
