//! Impls - ports の実装
//!
//! - memory: InMemoryJobStore（開発・テスト用）
//! - sqlite: SqliteJobStore（永続化）
//! - operations: ExternalOperation の同梱実装

pub mod memory;
pub mod operations;
pub mod sqlite;

pub use self::memory::InMemoryJobStore;
pub use self::operations::{EchoOperation, FORCED_FAILURE_MESSAGE, FnOperation, ForcedFailure};
pub use self::sqlite::SqliteJobStore;
