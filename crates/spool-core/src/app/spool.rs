//! Spool - ライブラリの表面
//!
//! submit / process_next / status / reap / counts をまとめた facade です。
//! 構築は `SpoolBuilder` を使います。

use std::sync::Arc;

use tokio::sync::Notify;

use crate::config::SpoolConfig;
use crate::domain::{JobId, JobView, SpoolError, WorkerId};
use crate::observability::JobCounts;
use crate::ports::{IdGenerator, JobStore};

use super::processor::{ProcessResult, Processor, Trigger};
use super::reaper_loop::{ReapReport, ReaperLoop, StaleLockReaper};
use super::status::StatusReader;
use super::submission::{SubmitReceipt, Submission, SubmissionHandler};
use super::worker_loop::{WorkerGroup, WorkerOptions};

pub struct Spool {
    pub(super) store: Arc<dyn JobStore>,
    pub(super) ids: Arc<dyn IdGenerator>,
    pub(super) submissions: SubmissionHandler,
    pub(super) processor: Arc<Processor>,
    pub(super) reaper: Arc<StaleLockReaper>,
    pub(super) status: StatusReader,
    pub(super) wake: Option<Arc<Notify>>,
    pub(super) config: SpoolConfig,
}

impl Spool {
    pub fn config(&self) -> &SpoolConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub async fn submit(&self, submission: Submission) -> Result<SubmitReceipt, SpoolError> {
        self.submissions.submit(submission).await
    }

    pub async fn process_next(
        &self,
        worker: &WorkerId,
        trigger: Trigger,
    ) -> Result<ProcessResult, SpoolError> {
        self.processor.process_next(worker, trigger).await
    }

    pub async fn status(&self, id: JobId) -> Result<JobView, SpoolError> {
        self.status.status(id).await
    }

    pub async fn reap(&self) -> Result<ReapReport, SpoolError> {
        self.reaper.reap().await
    }

    pub async fn counts(&self) -> Result<JobCounts, SpoolError> {
        self.status.counts().await
    }

    /// A fresh identity for one worker; generate once and keep it.
    pub fn new_worker_id(&self) -> WorkerId {
        self.ids.generate_worker_id()
    }

    /// Spawn `n` workers (defaults to `worker.concurrency`).
    pub fn spawn_workers(&self, n: Option<usize>) -> WorkerGroup {
        let n = n.unwrap_or(self.config.worker.concurrency);
        let workers = (0..n).map(|_| self.new_worker_id()).collect();
        WorkerGroup::spawn(
            workers,
            Arc::clone(&self.processor),
            WorkerOptions {
                poll_interval: self.config.worker.poll_interval(),
                wake: self.wake.clone(),
            },
        )
    }

    pub fn spawn_reaper(&self) -> ReaperLoop {
        ReaperLoop::spawn(Arc::clone(&self.reaper), self.config.reaper.interval())
    }
}
