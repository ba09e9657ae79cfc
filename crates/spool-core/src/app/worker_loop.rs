use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::domain::WorkerId;

use super::processor::{ProcessResult, Processor, Trigger};

/// Worker group handle.
/// - `shutdown_tx` を drop するとワーカー全体が止まる
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<WorkerId>,
    joins: Vec<JoinHandle<()>>,
}

/// Polling settings shared by every worker in a group.
#[derive(Clone)]
pub struct WorkerOptions {
    pub poll_interval: Duration,
    /// Woken on submission so idle workers do not wait out the full interval.
    pub wake: Option<Arc<Notify>>,
}

impl WorkerGroup {
    /// Spawn one worker per id.
    pub fn spawn(workers: Vec<WorkerId>, processor: Arc<Processor>, options: WorkerOptions) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(workers.len());
        for &worker_id in &workers {
            let processor = Arc::clone(&processor);
            let options = options.clone();
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, processor, options, &mut rx).await;
            });
            joins.push(join);
        }

        Self {
            shutdown_tx,
            workers,
            joins,
        }
    }

    pub fn worker_ids(&self) -> &[WorkerId] {
        &self.workers
    }

    /// Request shutdown for all workers.
    /// In-flight jobs are not cancelled; workers stop before the next claim.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(
    worker_id: WorkerId,
    processor: Arc<Processor>,
    options: WorkerOptions,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    tracing::info!(%worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let idle = match processor.process_next(&worker_id, Trigger::Normal).await {
            Ok(ProcessResult::Processed(summary)) => {
                tracing::debug!(%worker_id, job_id = %summary.job_id, status = %summary.status, "processed");
                false
            }
            Ok(ProcessResult::Idle) => true,
            Err(err) => {
                // LockLost / storage errors: the job state is left to the store, keep going
                tracing::error!(%worker_id, error = %err, "process_next failed");
                true
            }
        };
        if !idle {
            continue;
        }

        // 何もなければ poll_interval 待つ（submission の通知か shutdown で早起き）
        let sleep = tokio::time::sleep(options.poll_interval);
        let closed = match &options.wake {
            Some(wake) => tokio::select! {
                changed = shutdown_rx.changed() => changed.is_err(),
                _ = sleep => false,
                _ = wake.notified() => false,
            },
            None => tokio::select! {
                changed = shutdown_rx.changed() => changed.is_err(),
                _ = sleep => false,
            },
        };
        if closed {
            // sender dropped
            break;
        }
    }
    tracing::info!(%worker_id, "worker stopped");
}
