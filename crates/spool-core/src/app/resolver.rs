//! OutcomeResolver - 実行結果を状態遷移として書き戻す
//!
//! 遷移そのものは `JobRecord::resolve_success` / `resolve_failure` で計算し、
//! 書き込みは「まだ自分が lock を持っている」ことを条件にした CAS です。
//! reaper が先に回収していた場合は何も書かずに `LockLost` を返します。

use std::sync::Arc;

use crate::domain::{ExecutionOutcome, JobRecord, JobStatus, RetryPolicy, SpoolError};
use crate::ports::{Clock, Expectation, JobStore};

pub struct OutcomeResolver {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl OutcomeResolver {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Apply `outcome` to the claimed `job` and persist it.
    ///
    /// Returns the stored record.
    pub async fn resolve(
        &self,
        job: &JobRecord,
        outcome: ExecutionOutcome,
    ) -> Result<JobRecord, SpoolError> {
        let guard = job.lock_guard().ok_or(SpoolError::LockLost(job.id))?;
        let now = self.clock.now();

        let mut next = job.clone();
        match outcome {
            ExecutionOutcome::Success { result } => next.resolve_success(result, now),
            ExecutionOutcome::Failure { message } => {
                next.resolve_failure(message, &self.policy, now);
            }
        }

        let written = self
            .store
            .compare_and_set(&Expectation::Locked(guard), &next)
            .await
            .inspect_err(|err| {
                tracing::error!(job_id = %job.id, error = %err, "failed to record outcome");
            })?;
        if !written {
            tracing::warn!(
                job_id = %job.id,
                worker_id = ?job.locked_by,
                "lock lost before the outcome was recorded; discarding it"
            );
            return Err(SpoolError::LockLost(job.id));
        }

        match next.status {
            JobStatus::Completed => {
                tracing::info!(job_id = %next.id, "job completed");
            }
            JobStatus::Failed => tracing::info!(
                job_id = %next.id,
                retry_count = next.retry_count,
                max_retries = next.max_retries,
                next_retry_at = ?next.next_retry_at,
                error = next.error_message.as_deref().unwrap_or_default(),
                "job failed, retry scheduled"
            ),
            JobStatus::DeadLetter => tracing::warn!(
                job_id = %next.id,
                retry_count = next.retry_count,
                error = next.error_message.as_deref().unwrap_or_default(),
                "job dead-lettered"
            ),
            JobStatus::Pending | JobStatus::Processing => {}
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::tests::{sample_job, t0};
    use crate::domain::{JobLimits, WorkerId};
    use crate::impls::InMemoryJobStore;
    use crate::ports::ManualClock;
    use chrono::TimeDelta;
    use serde_json::json;

    struct Fixture {
        store: InMemoryJobStore,
        clock: Arc<ManualClock>,
        resolver: OutcomeResolver,
    }

    fn fixture() -> Fixture {
        let store = InMemoryJobStore::new();
        let clock = Arc::new(ManualClock::new(t0()));
        let resolver = OutcomeResolver::new(
            Arc::new(store.clone()),
            clock.clone(),
            RetryPolicy::default(),
        );
        Fixture {
            store,
            clock,
            resolver,
        }
    }

    async fn claimed(store: &InMemoryJobStore, limits: JobLimits) -> JobRecord {
        store.insert_unless_active(sample_job(limits)).await.unwrap();
        store
            .claim_next(WorkerId::generate(), t0())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn success_is_persisted() {
        let f = fixture();
        let job = claimed(&f.store, JobLimits::default()).await;
        f.clock.advance(TimeDelta::seconds(2));

        let stored = f
            .resolver
            .resolve(&job, ExecutionOutcome::success(json!({"ok": 1})))
            .await
            .unwrap();

        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.completed_at, Some(t0() + TimeDelta::seconds(2)));
        assert_eq!(f.store.get(job.id).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn failure_schedules_backoff() {
        let f = fixture();
        let job = claimed(&f.store, JobLimits::default()).await;

        let stored = f
            .resolver
            .resolve(&job, ExecutionOutcome::failure("boom"))
            .await
            .unwrap();

        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.next_retry_at, Some(t0() + TimeDelta::seconds(10)));
        assert!(stored.check_invariants().is_empty());
    }

    #[tokio::test]
    async fn failure_at_ceiling_dead_letters() {
        let f = fixture();
        let job = claimed(
            &f.store,
            JobLimits {
                max_retries: 1,
                timeout_seconds: 600,
            },
        )
        .await;

        let stored = f
            .resolver
            .resolve(&job, ExecutionOutcome::failure("boom"))
            .await
            .unwrap();

        assert_eq!(stored.status, JobStatus::DeadLetter);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.next_retry_at, None);
    }

    #[tokio::test]
    async fn reclaimed_job_reports_lock_lost_and_keeps_state() {
        let f = fixture();
        let job = claimed(&f.store, JobLimits::default()).await;

        // someone else (the reaper) already released the lock
        let mut released = job.clone();
        released.release_stale(&RetryPolicy::default(), t0() + TimeDelta::seconds(601));
        let guard = Expectation::Locked(job.lock_guard().unwrap());
        assert!(f.store.compare_and_set(&guard, &released).await.unwrap());

        let err = f
            .resolver
            .resolve(&job, ExecutionOutcome::success(json!(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, SpoolError::LockLost(id) if id == job.id));
        assert_eq!(f.store.get(job.id).await.unwrap(), Some(released));
    }

    #[tokio::test]
    async fn unclaimed_job_cannot_be_resolved() {
        let f = fixture();
        let job = sample_job(JobLimits::default());

        let err = f
            .resolver
            .resolve(&job, ExecutionOutcome::success(json!(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, SpoolError::LockLost(_)));
    }
}
