//! ReaperLoop - lock 期限切れの回収
//!
//! # フロー
//! 1. `JobStore::find_stale(now)` で期限切れ（job ごとの timeout）を取得
//! 2. `JobRecord::release_stale` で pending / dead_letter を計算
//! 3. lock を条件にした CAS で書き込み（worker が先に終えていたら skip）
//!
//! `StaleLockReaper::reap_once` が 1 回分、`ReaperLoop` がそれを一定間隔で回します。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::{JobStatus, RetryPolicy, SpoolError};
use crate::ports::{Clock, Expectation, JobStore};

/// What one reap pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapReport {
    pub requeued: usize,
    pub dead_lettered: usize,
    /// Lost the race to the worker (or another reaper).
    pub skipped: usize,
}

impl ReapReport {
    pub fn reclaimed(&self) -> usize {
        self.requeued + self.dead_lettered
    }
}

pub struct StaleLockReaper {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl StaleLockReaper {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Reap against the injected clock.
    pub async fn reap(&self) -> Result<ReapReport, SpoolError> {
        self.reap_once(self.clock.now()).await
    }

    pub async fn reap_once(&self, now: DateTime<Utc>) -> Result<ReapReport, SpoolError> {
        let mut report = ReapReport::default();

        for job in self.store.find_stale(now).await? {
            let Some(guard) = job.lock_guard() else {
                report.skipped += 1;
                continue;
            };

            let mut next = job.clone();
            let status = next.release_stale(&self.policy, now);

            if !self
                .store
                .compare_and_set(&Expectation::Locked(guard.clone()), &next)
                .await?
            {
                tracing::debug!(job_id = %job.id, "stale job already resolved; skipping");
                report.skipped += 1;
                continue;
            }

            match status {
                JobStatus::DeadLetter => {
                    tracing::warn!(
                        job_id = %next.id,
                        worker_id = %guard.worker,
                        locked_at = %guard.locked_at,
                        retry_count = next.retry_count,
                        "stale lock reclaimed; retries exhausted, dead-lettered"
                    );
                    report.dead_lettered += 1;
                }
                _ => {
                    tracing::warn!(
                        job_id = %next.id,
                        worker_id = %guard.worker,
                        locked_at = %guard.locked_at,
                        retry_count = next.retry_count,
                        next_retry_at = ?next.next_retry_at,
                        "stale lock reclaimed; job re-queued"
                    );
                    report.requeued += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Background task that runs `StaleLockReaper::reap` on a fixed interval.
/// - `shutdown_and_join()` で停止して終了を待つ
pub struct ReaperLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperLoop {
    pub fn spawn(reaper: Arc<StaleLockReaper>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                if *shutdown_rx.borrow() {
                    break;
                }
                match reaper.reap().await {
                    Ok(report) if report.reclaimed() > 0 => {
                        tracing::info!(
                            requeued = report.requeued,
                            dead_lettered = report.dead_lettered,
                            skipped = report.skipped,
                            "reaper pass"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::error!(error = %err, "reaper pass failed"),
                }
            }
            tracing::debug!("reaper loop stopped");
        });

        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::tests::{sample_job, t0};
    use crate::domain::{JobLimits, JobRecord, TIMED_OUT_DEAD, TIMED_OUT_WILL_RETRY, WorkerId};
    use crate::impls::InMemoryJobStore;
    use crate::ports::ManualClock;
    use chrono::TimeDelta;

    fn reaper(store: &InMemoryJobStore) -> StaleLockReaper {
        StaleLockReaper::new(
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(t0())),
            RetryPolicy::default(),
        )
    }

    async fn claimed(store: &InMemoryJobStore, job: JobRecord) -> JobRecord {
        store.insert_unless_active(job).await.unwrap();
        store
            .claim_next(WorkerId::generate(), t0())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn fresh_locks_are_left_alone() {
        let store = InMemoryJobStore::new();
        claimed(&store, sample_job(JobLimits::default())).await;

        let report = reaper(&store).reap_once(t0() + TimeDelta::seconds(600)).await.unwrap();

        assert_eq!(report, ReapReport::default());
    }

    #[tokio::test]
    async fn stale_job_is_requeued_with_backoff() {
        let store = InMemoryJobStore::new();
        let job = claimed(&store, sample_job(JobLimits::default())).await;
        let now = t0() + TimeDelta::seconds(601);

        let report = reaper(&store).reap_once(now).await.unwrap();

        assert_eq!(report.requeued, 1);
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.next_retry_at, Some(now + TimeDelta::seconds(10)));
        assert_eq!(stored.error_message.as_deref(), Some(TIMED_OUT_WILL_RETRY));
        assert!(stored.check_invariants().is_empty());
    }

    #[tokio::test]
    async fn stale_job_at_ceiling_is_dead_lettered() {
        let store = InMemoryJobStore::new();
        let mut job = sample_job(JobLimits::default());
        job.retry_count = 3;
        let job = claimed(&store, job).await;

        let report = reaper(&store).reap_once(t0() + TimeDelta::seconds(601)).await.unwrap();

        assert_eq!(report.dead_lettered, 1);
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::DeadLetter);
        assert_eq!(stored.retry_count, 3);
        assert_eq!(stored.error_message.as_deref(), Some(TIMED_OUT_DEAD));
    }

    #[tokio::test]
    async fn worker_finishing_first_wins() {
        let store = InMemoryJobStore::new();
        let job = claimed(&store, sample_job(JobLimits::default())).await;
        let stale = store.find_stale(t0() + TimeDelta::seconds(601)).await.unwrap();
        assert_eq!(stale.len(), 1);

        // the worker completes between find_stale and the reaper's write
        let mut done = job.clone();
        done.resolve_success(serde_json::json!(1), t0() + TimeDelta::seconds(601));
        let guard = Expectation::Locked(job.lock_guard().unwrap());
        assert!(store.compare_and_set(&guard, &done).await.unwrap());

        let mut reaped = stale[0].clone();
        reaped.release_stale(&RetryPolicy::default(), t0() + TimeDelta::seconds(601));
        assert!(!store.compare_and_set(&guard, &reaped).await.unwrap());
        assert_eq!(store.get(job.id).await.unwrap(), Some(done));

        // and a full pass now finds nothing
        let report = reaper(&store).reap_once(t0() + TimeDelta::seconds(601)).await.unwrap();
        assert_eq!(report, ReapReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_reaps_until_shutdown() {
        let store = InMemoryJobStore::new();
        let job = claimed(&store, sample_job(JobLimits::default())).await;
        let clock = Arc::new(ManualClock::new(t0() + TimeDelta::seconds(601)));
        let reaper = Arc::new(StaleLockReaper::new(
            Arc::new(store.clone()),
            clock,
            RetryPolicy::default(),
        ));

        let reaper_loop = ReaperLoop::spawn(reaper, Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(1)).await;
        reaper_loop.shutdown_and_join().await;

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
    }
}
