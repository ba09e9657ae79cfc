//! Client-facing projection of a job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::job::{JobRecord, JobStatus};

/// Serializable view of a job's current state.
///
/// Fields are filled per status:
/// - completed: result, completed_at
/// - failed: error_message, retry_count, max_retries, next_retry_at
/// - dead_letter: error_message, retry_count, max_retries, completed_at
/// - pending after at least one attempt: retry_count, max_retries, next_retry_at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobView {
    fn from(job: &JobRecord) -> Self {
        let mut view = JobView {
            job_id: job.id,
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
            result: None,
            completed_at: None,
            error_message: None,
            retry_count: None,
            max_retries: None,
            next_retry_at: None,
        };

        match job.status {
            JobStatus::Completed => {
                view.result = job.result.clone();
                view.completed_at = job.completed_at;
            }
            JobStatus::Failed | JobStatus::DeadLetter => {
                view.error_message = job.error_message.clone();
                view.retry_count = Some(job.retry_count);
                view.max_retries = Some(job.max_retries);
                view.next_retry_at = job.next_retry_at;
                view.completed_at = job.completed_at;
            }
            JobStatus::Pending if job.retry_count > 0 => {
                view.retry_count = Some(job.retry_count);
                view.max_retries = Some(job.max_retries);
                view.next_retry_at = job.next_retry_at;
            }
            JobStatus::Pending | JobStatus::Processing => {}
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::WorkerId;
    use crate::domain::job::JobLimits;
    use crate::domain::job::tests::{sample_job, t0};
    use crate::domain::retry::RetryPolicy;
    use serde_json::json;

    #[test]
    fn fresh_pending_view_is_minimal() {
        let job = sample_job(JobLimits::default());
        let v = serde_json::to_value(JobView::from(&job)).unwrap();

        assert_eq!(v["status"], "pending");
        assert!(v.get("retry_count").is_none());
        assert!(v.get("result").is_none());
    }

    #[test]
    fn completed_view_has_result_only() {
        let mut job = sample_job(JobLimits::default());
        job.claim(WorkerId::generate(), t0());
        job.resolve_success(json!({"answer": 42}), t0());

        let view = JobView::from(&job);
        assert_eq!(view.result, Some(json!({"answer": 42})));
        assert_eq!(view.completed_at, Some(t0()));
        assert_eq!(view.error_message, None);
        assert_eq!(view.retry_count, None);
    }

    #[test]
    fn failed_view_has_error_and_counts() {
        let mut job = sample_job(JobLimits::default());
        job.claim(WorkerId::generate(), t0());
        job.resolve_failure("bad gateway", &RetryPolicy::default(), t0());

        let view = JobView::from(&job);
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.error_message.as_deref(), Some("bad gateway"));
        assert_eq!(view.retry_count, Some(1));
        assert_eq!(view.max_retries, Some(3));
        assert!(view.next_retry_at.is_some());
        assert_eq!(view.result, None);
    }

    #[test]
    fn requeued_pending_view_shows_retry_counts() {
        let mut job = sample_job(JobLimits::default());
        job.claim(WorkerId::generate(), t0());
        job.release_stale(&RetryPolicy::default(), t0());

        let view = JobView::from(&job);
        assert_eq!(view.status, JobStatus::Pending);
        assert_eq!(view.retry_count, Some(1));
        assert_eq!(view.max_retries, Some(3));
        assert_eq!(view.error_message, None);
    }

    #[test]
    fn processing_view_hides_lock_owner() {
        let mut job = sample_job(JobLimits::default());
        job.claim(WorkerId::generate(), t0());

        let v = serde_json::to_value(JobView::from(&job)).unwrap();
        assert_eq!(v["status"], "processing");
        assert!(v.get("locked_by").is_none());
    }
}
