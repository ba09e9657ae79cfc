//! spool-core
//!
//! Durable single-queue job processor: submit work, claim it from many
//! workers without double-processing, retry with exponential backoff, and
//! recover jobs whose worker died mid-flight.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job の状態遷移, retry, idempotency key, view, errors）
//! - **ports**: 抽象化レイヤー（JobStore, Clock, IdGenerator, ExternalOperation）
//! - **app**: アプリケーションロジック（submission, claim, runner, resolver, reaper, worker）
//! - **impls**: 実装（InMemoryJobStore, SqliteJobStore, 同梱 operation）
//! - **config**: 設定（TOML + 環境変数）
//! - **observability**: tracing の初期化と status 集計

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{ProcessResult, Spool, SpoolBuilder, Submission, SubmitReceipt, Trigger};
pub use config::SpoolConfig;
pub use domain::{JobId, JobStatus, JobView, SpoolError, WorkerId};
