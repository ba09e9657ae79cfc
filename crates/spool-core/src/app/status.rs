//! Status - 読み取り専用のビュー

use std::sync::Arc;

use crate::domain::{JobId, JobView, SpoolError};
use crate::observability::JobCounts;
use crate::ports::JobStore;

pub struct StatusReader {
    store: Arc<dyn JobStore>,
}

impl StatusReader {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn status(&self, id: JobId) -> Result<JobView, SpoolError> {
        let job = self.store.get(id).await?.ok_or(SpoolError::NotFound(id))?;
        Ok(JobView::from(&job))
    }

    pub async fn counts(&self) -> Result<JobCounts, SpoolError> {
        self.store.counts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::tests::{sample_job, t0};
    use crate::domain::{JobLimits, JobStatus, RetryPolicy, WorkerId};
    use crate::impls::InMemoryJobStore;
    use crate::ports::Expectation;
    use ulid::Ulid;

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let reader = StatusReader::new(Arc::new(InMemoryJobStore::new()));
        let id = JobId::from_ulid(Ulid::new());

        let err = reader.status(id).await.unwrap_err();

        assert!(matches!(err, SpoolError::NotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn failed_job_view_shows_retry_details() {
        let store = InMemoryJobStore::new();
        store
            .insert_unless_active(sample_job(JobLimits::default()))
            .await
            .unwrap();
        let job = store
            .claim_next(WorkerId::generate(), t0())
            .await
            .unwrap()
            .unwrap();
        let mut failed = job.clone();
        failed.resolve_failure("boom", &RetryPolicy::default(), t0());
        let guard = Expectation::Locked(job.lock_guard().unwrap());
        assert!(store.compare_and_set(&guard, &failed).await.unwrap());
        let reader = StatusReader::new(Arc::new(store));

        let view = reader.status(job.id).await.unwrap();

        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.error_message.as_deref(), Some("boom"));
        assert_eq!(view.retry_count, Some(1));
        assert_eq!(view.max_retries, Some(3));
        assert!(view.next_retry_at.is_some());
        assert_eq!(reader.counts().await.unwrap().failed, 1);
    }
}
