//! Ports - 抽象化レイヤー
//!
//! 外部とのインターフェース（ストア、時刻、ID 生成、外部オペレーション）を
//! trait として定義します。実装は `impls` にあります。

pub mod clock;
pub mod id_generator;
pub mod job_store;
pub mod operation;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::{Expectation, InsertOutcome, JobStore};
pub use self::operation::{ExternalOperation, OperationError, OperationRequest};
