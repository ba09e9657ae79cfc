//! Domain model: ids, the job record and its state machine, retry policy,
//! outcomes, views and errors.
//!
//! Nothing here performs I/O. Transitions are pure methods on `JobRecord`.

pub mod errors;
pub mod idempotency;
pub mod ids;
pub mod job;
pub mod outcome;
pub mod retry;
pub mod view;

pub use errors::SpoolError;
pub use idempotency::{ANONYMOUS_SUBMITTER, IdempotencyKey};
pub use ids::{IdParseError, JobId, WorkerId};
pub use job::{
    JobLimits, JobRecord, JobStatus, LockGuard, TIMED_OUT_DEAD, TIMED_OUT_WILL_RETRY,
    UnknownStatus,
};
pub use outcome::ExecutionOutcome;
pub use retry::RetryPolicy;
pub use view::JobView;
