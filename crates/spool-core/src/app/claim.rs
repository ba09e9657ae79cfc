//! ClaimManager - 排他的な claim
//!
//! 実際の排他は `JobStore::claim_next` の atomic な条件付き更新で担保され、
//! ここでは時刻の取得とログだけを行います。競合に負けた worker は
//! エラーではなく `NothingEligible` を受け取ります。

use std::sync::Arc;

use crate::domain::{JobRecord, SpoolError, WorkerId};
use crate::ports::{Clock, JobStore};

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimResult {
    Claimed(JobRecord),
    NothingEligible,
}

pub struct ClaimManager {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl ClaimManager {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn claim(&self, worker: &WorkerId) -> Result<ClaimResult, SpoolError> {
        let now = self.clock.now();
        match self.store.claim_next(*worker, now).await? {
            Some(job) => {
                tracing::debug!(
                    job_id = %job.id,
                    worker_id = %worker,
                    retry_count = job.retry_count,
                    "job claimed"
                );
                Ok(ClaimResult::Claimed(job))
            }
            None => Ok(ClaimResult::NothingEligible),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobLimits;
    use crate::domain::job::tests::{sample_job, t0};
    use crate::impls::InMemoryJobStore;
    use crate::ports::ManualClock;

    #[tokio::test]
    async fn empty_store_has_nothing_eligible() {
        let manager = ClaimManager::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(ManualClock::new(t0())),
        );

        let result = manager.claim(&WorkerId::generate()).await.unwrap();

        assert_eq!(result, ClaimResult::NothingEligible);
    }

    #[tokio::test]
    async fn racing_workers_split_into_one_winner() {
        let store = InMemoryJobStore::new();
        store
            .insert_unless_active(sample_job(JobLimits::default()))
            .await
            .unwrap();
        let manager = Arc::new(ClaimManager::new(
            Arc::new(store),
            Arc::new(ManualClock::new(t0())),
        ));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.claim(&WorkerId::generate()).await })
            })
            .collect();

        let mut claimed = 0;
        let mut nothing = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                ClaimResult::Claimed(job) => {
                    assert!(job.check_invariants().is_empty());
                    claimed += 1;
                }
                ClaimResult::NothingEligible => nothing += 1,
            }
        }
        assert_eq!((claimed, nothing), (1, 1));
    }
}
