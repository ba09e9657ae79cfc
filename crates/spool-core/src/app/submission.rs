//! SubmissionHandler - 投入と重複排除
//!
//! # フロー
//! 1. payload を検証（空は Validation）
//! 2. (submitter, payload) から idempotency key を導出
//! 3. 同じ key の active な job があればそれを返す（何も書かない）
//! 4. なければ pending で insert（競合時は store が active 行を返す）
//!
//! `DedupScope::ReuseLatest` の場合は 3 と 4 の間で、終了済みの最新行を
//! pending に戻して再利用します。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::DedupScope;
use crate::domain::{
    ANONYMOUS_SUBMITTER, IdempotencyKey, JobId, JobLimits, JobRecord, JobStatus, SpoolError,
};
use crate::ports::{Clock, Expectation, IdGenerator, InsertOutcome, JobStore};

/// How many times a submission re-reads the store after losing a race.
const MAX_SUBMIT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub payload: serde_json::Value,
    #[serde(default)]
    pub submitter: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl Submission {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            submitter: None,
            max_retries: None,
            timeout_seconds: None,
        }
    }

    pub fn from_submitter(mut self, submitter: impl Into<String>) -> Self {
        self.submitter = Some(submitter.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    fn limits(&self, defaults: JobLimits) -> JobLimits {
        JobLimits {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            timeout_seconds: self.timeout_seconds.unwrap_or(defaults.timeout_seconds),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    pub status: JobStatus,
    /// True when no new row was created.
    pub deduplicated: bool,
}

impl SubmitReceipt {
    fn fresh(job: &JobRecord) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            deduplicated: false,
        }
    }

    fn existing(job: &JobRecord) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            deduplicated: true,
        }
    }
}

pub struct SubmissionHandler {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    defaults: JobLimits,
    dedup_scope: DedupScope,
}

impl SubmissionHandler {
    pub fn new(
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        defaults: JobLimits,
        dedup_scope: DedupScope,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            defaults,
            dedup_scope,
        }
    }

    pub async fn submit(&self, submission: Submission) -> Result<SubmitReceipt, SpoolError> {
        validate_payload(&submission.payload)?;
        if submission.timeout_seconds == Some(0) {
            return Err(SpoolError::Validation("timeout_seconds must be positive".into()));
        }

        let key = IdempotencyKey::derive(submission.submitter.as_deref(), &submission.payload);

        for _ in 0..MAX_SUBMIT_ATTEMPTS {
            if let Some(active) = self.store.find_active_by_key(&key).await? {
                tracing::info!(job_id = %active.id, status = %active.status, "duplicate submission");
                return Ok(SubmitReceipt::existing(&active));
            }

            if self.dedup_scope == DedupScope::ReuseLatest {
                if let Some(latest) = self.store.find_latest_by_key(&key).await? {
                    match self.reuse(latest).await? {
                        Some(receipt) => return Ok(receipt),
                        None => continue,
                    }
                }
            }

            let now = self.clock.now();
            let job = JobRecord::pending(
                self.ids.generate_job_id(),
                key.clone(),
                submission.payload.clone(),
                submission.submitter.clone(),
                submission.limits(self.defaults),
                now,
            );

            return match self.store.insert_unless_active(job).await? {
                InsertOutcome::Inserted(job) => {
                    tracing::info!(
                        job_id = %job.id,
                        submitter = job.submitter.as_deref().unwrap_or(ANONYMOUS_SUBMITTER),
                        max_retries = job.max_retries,
                        timeout_seconds = job.timeout_seconds,
                        "job submitted"
                    );
                    Ok(SubmitReceipt::fresh(&job))
                }
                InsertOutcome::Existing(active) => {
                    tracing::info!(job_id = %active.id, "duplicate submission (concurrent)");
                    Ok(SubmitReceipt::existing(&active))
                }
            };
        }

        Err(SpoolError::storage(format!(
            "submission for key {key} kept losing races after {MAX_SUBMIT_ATTEMPTS} attempts"
        )))
    }

    /// Reset the latest finished row for the key. `None` means somebody else
    /// touched it first and the caller should look again.
    async fn reuse(&self, latest: JobRecord) -> Result<Option<SubmitReceipt>, SpoolError> {
        if latest.status.is_active() {
            return Ok(Some(SubmitReceipt::existing(&latest)));
        }

        let expect = Expectation::Unchanged {
            status: latest.status,
            updated_at: latest.updated_at,
        };
        let previous = latest.status;
        let mut reset = latest;
        reset.reset_for_resubmit(self.clock.now());

        if !self.store.compare_and_set(&expect, &reset).await? {
            tracing::debug!(job_id = %reset.id, "resubmission reset lost a race");
            return Ok(None);
        }

        tracing::info!(job_id = %reset.id, %previous, "job resubmitted in place");
        Ok(Some(SubmitReceipt::existing(&reset)))
    }
}

/// Reject payloads that carry nothing to work on.
pub fn validate_payload(payload: &serde_json::Value) -> Result<(), SpoolError> {
    use serde_json::Value;

    let empty = match payload {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    };
    if empty {
        return Err(SpoolError::Validation("payload must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RetryPolicy;
    use crate::domain::job::tests::t0;
    use crate::impls::InMemoryJobStore;
    use crate::ports::{ManualClock, UlidGenerator};
    use rstest::rstest;
    use serde_json::json;

    struct Fixture {
        store: InMemoryJobStore,
        clock: Arc<ManualClock>,
        handler: SubmissionHandler,
    }

    fn fixture(scope: DedupScope) -> Fixture {
        let store = InMemoryJobStore::new();
        let clock = Arc::new(ManualClock::new(t0()));
        let handler = SubmissionHandler::new(
            Arc::new(store.clone()),
            clock.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
            JobLimits::default(),
            scope,
        );
        Fixture {
            store,
            clock,
            handler,
        }
    }

    async fn finish_with_failure(store: &InMemoryJobStore, id: JobId) {
        let mut job = store.get(id).await.unwrap().unwrap();
        let expect = Expectation::Unchanged {
            status: job.status,
            updated_at: job.updated_at,
        };
        job.max_retries = 0;
        job.resolve_failure("boom", &RetryPolicy::default(), t0());
        assert!(store.compare_and_set(&expect, &job).await.unwrap());
    }

    #[rstest]
    #[case::null(json!(null))]
    #[case::empty_string(json!(""))]
    #[case::blank_string(json!("   "))]
    #[case::empty_object(json!({}))]
    #[case::empty_array(json!([]))]
    fn empty_payloads_are_rejected(#[case] payload: serde_json::Value) {
        assert!(matches!(
            validate_payload(&payload),
            Err(SpoolError::Validation(_))
        ));
    }

    #[rstest]
    #[case::string(json!("X"))]
    #[case::zero(json!(0))]
    #[case::false_(json!(false))]
    #[case::object(json!({"input": "X"}))]
    fn non_empty_payloads_pass(#[case] payload: serde_json::Value) {
        assert!(validate_payload(&payload).is_ok());
    }

    #[tokio::test]
    async fn new_submission_is_pending_with_defaults() {
        let f = fixture(DedupScope::ActiveOnly);

        let receipt = f.handler.submit(Submission::new(json!("X"))).await.unwrap();

        assert_eq!(receipt.status, JobStatus::Pending);
        assert!(!receipt.deduplicated);
        let job = f.store.get(receipt.job_id).await.unwrap().unwrap();
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.timeout_seconds, 600);
        assert_eq!(job.created_at, t0());
    }

    #[tokio::test]
    async fn overrides_apply_per_submission() {
        let f = fixture(DedupScope::ActiveOnly);

        let receipt = f
            .handler
            .submit(
                Submission::new(json!("X"))
                    .with_max_retries(1)
                    .with_timeout_seconds(5),
            )
            .await
            .unwrap();

        let job = f.store.get(receipt.job_id).await.unwrap().unwrap();
        assert_eq!(job.max_retries, 1);
        assert_eq!(job.timeout_seconds, 5);
    }

    #[tokio::test]
    async fn empty_submission_writes_nothing() {
        let f = fixture(DedupScope::ActiveOnly);

        let err = f.handler.submit(Submission::new(json!({}))).await.unwrap_err();

        assert!(matches!(err, SpoolError::Validation(_)));
        assert_eq!(f.store.counts().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn resubmission_while_active_returns_same_id() {
        let f = fixture(DedupScope::ActiveOnly);
        let first = f.handler.submit(Submission::new(json!("X"))).await.unwrap();

        let second = f.handler.submit(Submission::new(json!("X"))).await.unwrap();

        assert_eq!(second.job_id, first.job_id);
        assert!(second.deduplicated);
        assert_eq!(f.store.counts().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn different_submitters_get_different_jobs() {
        let f = fixture(DedupScope::ActiveOnly);

        let a = f
            .handler
            .submit(Submission::new(json!("X")).from_submitter("alice"))
            .await
            .unwrap();
        let b = f
            .handler
            .submit(Submission::new(json!("X")).from_submitter("bob"))
            .await
            .unwrap();

        assert_ne!(a.job_id, b.job_id);
    }

    #[tokio::test]
    async fn concurrent_identical_submissions_create_one_job() {
        let f = fixture(DedupScope::ActiveOnly);
        let handler = Arc::new(f.handler);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move { handler.submit(Submission::new(json!("X"))).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().job_id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(f.store.counts().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn active_only_creates_fresh_row_after_dead_letter() {
        let f = fixture(DedupScope::ActiveOnly);
        let first = f.handler.submit(Submission::new(json!("X"))).await.unwrap();
        finish_with_failure(&f.store, first.job_id).await;
        f.clock.advance(chrono::TimeDelta::seconds(1));

        let second = f.handler.submit(Submission::new(json!("X"))).await.unwrap();

        assert_ne!(second.job_id, first.job_id);
        assert!(!second.deduplicated);
        let counts = f.store.counts().await.unwrap();
        assert_eq!(counts.dead_letter, 1);
        assert_eq!(counts.pending, 1);
    }

    #[tokio::test]
    async fn reuse_latest_resets_the_finished_row() {
        let f = fixture(DedupScope::ReuseLatest);
        let first = f.handler.submit(Submission::new(json!("X"))).await.unwrap();
        finish_with_failure(&f.store, first.job_id).await;
        f.clock.advance(chrono::TimeDelta::seconds(1));

        let second = f.handler.submit(Submission::new(json!("X"))).await.unwrap();

        assert_eq!(second.job_id, first.job_id);
        assert!(second.deduplicated);
        assert_eq!(second.status, JobStatus::Pending);

        let job = f.store.get(first.job_id).await.unwrap().unwrap();
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.error_message, None);
        assert_eq!(job.completed_at, None);
        assert_eq!(job.updated_at, t0() + chrono::TimeDelta::seconds(1));
        assert!(job.check_invariants().is_empty());
        assert_eq!(f.store.counts().await.unwrap().total(), 1);
    }
}
