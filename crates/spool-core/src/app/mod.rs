//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **SpoolBuilder / Spool**: 構築と facade
//! - **SubmissionHandler**: 投入と重複排除
//! - **ClaimManager**: atomic claim
//! - **ExecutionRunner**: 外部オペレーション呼び出し（panic / timeout を Failure に）
//! - **OutcomeResolver**: 結果を lock 付き CAS で書き戻す
//! - **StaleLockReaper / ReaperLoop**: lock 期限切れの回収
//! - **StatusReader**: 読み取り専用ビュー
//! - **Processor / WorkerGroup**: 1 件処理と、それを回す worker

pub mod builder;
pub mod claim;
pub mod processor;
pub mod reaper_loop;
pub mod resolver;
pub mod runner;
pub mod spool;
pub mod status;
pub mod submission;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, SpoolBuilder};
pub use self::claim::{ClaimManager, ClaimResult};
pub use self::processor::{OutcomeSummary, ProcessResult, Processor, Trigger};
pub use self::reaper_loop::{ReapReport, ReaperLoop, StaleLockReaper};
pub use self::resolver::OutcomeResolver;
pub use self::runner::ExecutionRunner;
pub use self::spool::Spool;
pub use self::status::StatusReader;
pub use self::submission::{Submission, SubmissionHandler, SubmitReceipt, validate_payload};
pub use self::worker_loop::{WorkerGroup, WorkerOptions};
