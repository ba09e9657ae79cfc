//! SpoolBuilder - 構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターン（store / clock / id 生成 / operation を差し替え可能に）
//! - 起動時検証（設定が不正なら build() で落とす）

use std::sync::Arc;

use tokio::sync::Notify;

use crate::config::{SpoolConfig, StoreBackend};
use crate::domain::SpoolError;
use crate::impls::{ForcedFailure, InMemoryJobStore, SqliteJobStore};
use crate::ports::{Clock, ExternalOperation, IdGenerator, JobStore, SystemClock, UlidGenerator};

use super::claim::ClaimManager;
use super::processor::Processor;
use super::reaper_loop::StaleLockReaper;
use super::resolver::OutcomeResolver;
use super::runner::ExecutionRunner;
use super::spool::Spool;
use super::status::StatusReader;
use super::submission::SubmissionHandler;

/// # 使用例
/// ```ignore
/// let spool = SpoolBuilder::new(config)
///     .open_store()
///     .await?
///     .with_operation(Arc::new(EchoOperation))
///     .build()?;
/// ```
pub struct SpoolBuilder {
    config: SpoolConfig,
    store: Option<Arc<dyn JobStore>>,
    wake: Option<Arc<Notify>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    operation: Option<Arc<dyn ExternalOperation>>,
    forced_failure: Option<Arc<dyn ExternalOperation>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no job store configured; call with_store() or open_store()")]
    MissingStore,

    #[error("no external operation configured; call with_operation()")]
    MissingOperation,

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[source] SpoolError),

    #[error("failed to open job store: {0}")]
    Store(#[source] SpoolError),
}

impl SpoolBuilder {
    pub fn new(config: SpoolConfig) -> Self {
        Self {
            config,
            store: None,
            wake: None,
            clock: None,
            ids: None,
            operation: None,
            forced_failure: None,
        }
    }

    pub fn config(&self) -> &SpoolConfig {
        &self.config
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self.wake = None;
        self
    }

    /// In-memory store; idle workers are woken by its submission notifier.
    pub fn with_memory_store(mut self, store: InMemoryJobStore) -> Self {
        self.wake = Some(store.notifier());
        self.store = Some(Arc::new(store));
        self
    }

    /// Open the store described by `config.store`.
    pub async fn open_store(self) -> Result<Self, BuildError> {
        match self.config.store.backend {
            StoreBackend::Memory => Ok(self.with_memory_store(InMemoryJobStore::new())),
            StoreBackend::Sqlite => {
                let store = SqliteJobStore::connect(
                    &self.config.store.url,
                    self.config.store.max_connections,
                )
                .await
                .map_err(BuildError::Store)?;
                Ok(self.with_store(Arc::new(store)))
            }
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_operation(mut self, operation: Arc<dyn ExternalOperation>) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Replace the operation used for `Trigger::ForceFailure`.
    pub fn with_forced_failure(mut self, operation: Arc<dyn ExternalOperation>) -> Self {
        self.forced_failure = Some(operation);
        self
    }

    pub fn build(self) -> Result<Spool, BuildError> {
        self.config.validate().map_err(BuildError::InvalidConfig)?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let operation = self.operation.ok_or(BuildError::MissingOperation)?;
        let forced_failure = self
            .forced_failure
            .unwrap_or_else(|| Arc::new(ForcedFailure::default()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let config = self.config;
        let policy = config.retry_policy();

        let reaper = Arc::new(StaleLockReaper::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            policy.clone(),
        ));
        let mut processor = Processor::new(
            ClaimManager::new(Arc::clone(&store), Arc::clone(&clock)),
            ExecutionRunner::new(Arc::clone(&clock)).with_call_timeout(config.worker.call_timeout()),
            OutcomeResolver::new(Arc::clone(&store), Arc::clone(&clock), policy),
            operation,
            forced_failure,
        );
        if config.worker.reap_on_claim {
            processor = processor.reap_before_claim(Arc::clone(&reaper));
        }

        let submissions = SubmissionHandler::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&ids),
            config.job_limits(),
            config.jobs.dedup_scope,
        );

        Ok(Spool {
            status: StatusReader::new(Arc::clone(&store)),
            store,
            ids,
            submissions,
            processor: Arc::new(processor),
            reaper,
            wake: self.wake,
            config,
        })
    }
}

impl Default for SpoolBuilder {
    fn default() -> Self {
        Self::new(SpoolConfig::default())
    }
}
