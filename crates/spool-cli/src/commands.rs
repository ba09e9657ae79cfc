//! CLI command definitions and dispatch.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use spool_core::app::{Spool, SpoolBuilder, Submission, Trigger};
use spool_core::config::SpoolConfig;
use spool_core::impls::EchoOperation;
use spool_core::observability::init_tracing;

/// spool - durable single-queue job processor
#[derive(Debug, Parser)]
#[command(name = "spool", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (SPOOL__* environment variables override it)
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Override the store URL (e.g. sqlite://jobs.db)
    #[arg(long)]
    pub store_url: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Submit a job; PAYLOAD is JSON (bare words are taken as a string)
    Submit {
        payload: String,
        #[arg(short, long)]
        submitter: Option<String>,
        #[arg(long)]
        max_retries: Option<u32>,
        #[arg(long)]
        timeout_seconds: Option<u64>,
    },
    /// Claim and process one job
    Process {
        /// Fail the job regardless of the operation's answer
        #[arg(long)]
        force_failure: bool,
    },
    /// Show a job's status
    Status { job_id: String },
    /// Reclaim jobs whose lock has expired
    Reap,
    /// Job counts per status
    Counts,
    /// Run workers and the reaper until Ctrl-C
    Work {
        /// Number of workers (defaults to worker.concurrency)
        #[arg(short, long)]
        workers: Option<usize>,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> anyhow::Result<()> {
        let mut config = SpoolConfig::load(Some(self.config.as_str()))
            .with_context(|| format!("failed to load config from {}", self.config))?;
        if let Some(url) = &self.store_url {
            config.store.url = url.clone();
        }
        init_tracing(&config.logging)?;

        let spool = open(config).await?;

        match &self.command {
            Commands::Submit {
                payload,
                submitter,
                max_retries,
                timeout_seconds,
            } => {
                let mut submission = Submission::new(parse_payload(payload));
                if let Some(submitter) = submitter {
                    submission = submission.from_submitter(submitter.clone());
                }
                if let Some(n) = max_retries {
                    submission = submission.with_max_retries(*n);
                }
                if let Some(n) = timeout_seconds {
                    submission = submission.with_timeout_seconds(*n);
                }
                print_json(&spool.submit(submission).await?)
            }
            Commands::Process { force_failure } => {
                let trigger = if *force_failure {
                    Trigger::ForceFailure
                } else {
                    Trigger::Normal
                };
                let worker = spool.new_worker_id();
                print_json(&spool.process_next(&worker, trigger).await?)
            }
            Commands::Status { job_id } => {
                let id = job_id.parse().context("invalid job id")?;
                print_json(&spool.status(id).await?)
            }
            Commands::Reap => print_json(&spool.reap().await?),
            Commands::Counts => print_json(&spool.counts().await?),
            Commands::Work { workers } => work(&spool, *workers).await,
        }
    }
}

async fn open(config: SpoolConfig) -> anyhow::Result<Spool> {
    let spool = SpoolBuilder::new(config)
        .open_store()
        .await?
        .with_operation(Arc::new(EchoOperation))
        .build()?;
    Ok(spool)
}

async fn work(spool: &Spool, workers: Option<usize>) -> anyhow::Result<()> {
    let reaper = spool.spawn_reaper();
    let group = spool.spawn_workers(workers);
    tracing::info!(workers = group.worker_ids().len(), "workers running; Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("shutting down");
    group.shutdown_and_join().await;
    reaper.shutdown_and_join().await;
    print_json(&spool.counts().await?)
}

/// JSON if it parses, otherwise the raw text as a JSON string.
fn parse_payload(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
