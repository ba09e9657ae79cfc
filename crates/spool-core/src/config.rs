//! Configuration.
//!
//! Loaded from an optional TOML file merged with `SPOOL__`-prefixed
//! environment variables (`SPOOL__RETRY__MAX_RETRIES=5`). Every field has a
//! default, so an empty source yields a working configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{JobLimits, RetryPolicy, SpoolError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpoolConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay after the first failure; doubles on each further failure.
    #[serde(default = "default_base_delay")]
    pub base_delay_seconds: u64,
    /// Optional ceiling for the backoff delay.
    #[serde(default)]
    pub max_delay_seconds: Option<u64>,
    /// Default attempt ceiling for new jobs.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Default lock timeout for new jobs.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub dedup_scope: DedupScope,
}

/// What a resubmission does once the previous job for the key is no longer
/// pending/processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupScope {
    /// Create a fresh row; earlier rows are kept untouched for audit.
    #[default]
    ActiveOnly,
    /// Reset the latest row for the key back to pending and reuse its id.
    ReuseLatest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent worker tasks.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Sleep between claim attempts when nothing is eligible.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Reclaim stale locks before every claim attempt.
    #[serde(default = "default_true")]
    pub reap_on_claim: bool,
    /// Optional deadline for a single external call.
    #[serde(default)]
    pub call_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_reaper_interval")]
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// SQLite connection URL (ignored by the memory backend).
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn`, `error`, or any EnvFilter directive.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl SpoolConfig {
    /// Load from `path` (optional, any format the `config` crate knows by
    /// extension) and the environment, then validate.
    pub fn load(path: Option<&str>) -> Result<Self, SpoolError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("SPOOL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: SpoolConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SpoolError> {
        if self.retry.base_delay_seconds == 0 {
            return Err(SpoolError::Config(
                "retry.base_delay_seconds must be positive".into(),
            ));
        }
        if self.jobs.timeout_seconds == 0 {
            return Err(SpoolError::Config("jobs.timeout_seconds must be positive".into()));
        }
        if self.worker.concurrency == 0 {
            return Err(SpoolError::Config("worker.concurrency must be positive".into()));
        }
        if self.store.max_connections == 0 {
            return Err(SpoolError::Config("store.max_connections must be positive".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(Duration::from_secs(self.retry.base_delay_seconds));
        match self.retry.max_delay_seconds {
            Some(cap) => policy.with_max_delay(Duration::from_secs(cap)),
            None => policy,
        }
    }

    pub fn job_limits(&self) -> JobLimits {
        JobLimits {
            max_retries: self.retry.max_retries,
            timeout_seconds: self.jobs.timeout_seconds,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_seconds.map(Duration::from_secs)
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: default_base_delay(),
            max_delay_seconds: None,
            max_retries: default_max_retries(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            dedup_scope: DedupScope::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            reap_on_claim: default_true(),
            call_timeout_seconds: None,
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_reaper_interval(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_base_delay() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout() -> u64 {
    600
}

fn default_concurrency() -> usize {
    1
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_reaper_interval() -> u64 {
    30
}

fn default_store_url() -> String {
    "sqlite://spool.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SpoolConfig::default();

        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.job_limits(), JobLimits::default());
        assert_eq!(config.jobs.dedup_scope, DedupScope::ActiveOnly);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.worker.reap_on_claim);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let toml = r#"
            [retry]
            max_retries = 5
            max_delay_seconds = 60

            [jobs]
            dedup_scope = "reuse_latest"

            [logging]
            format = "json"
        "#;
        let config: SpoolConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_seconds, 10);
        assert_eq!(config.retry_policy().backoff(10), Duration::from_secs(60));
        assert_eq!(config.jobs.dedup_scope, DedupScope::ReuseLatest);
        assert_eq!(config.jobs.timeout_seconds, 600);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = SpoolConfig::load(Some("does/not/exist")).unwrap();
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn validate_rejects_zero_delay() {
        let mut config = SpoolConfig::default();
        config.retry.base_delay_seconds = 0;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, SpoolError::Config(_)));
    }
}
