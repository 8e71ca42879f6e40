//! Domain model: ids, states, records, executor contract, errors.

pub mod approval;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod run;
pub mod state;
pub mod task;

pub use approval::{ApprovalChannel, ApprovalRequest};
pub use errors::CoreError;
pub use ids::{ApprovalId, JobId, RunId, TaskId, UserId};
pub use outcome::ExecutorOutcome;
pub use run::RunRecord;
pub use state::{ApprovalStatus, RunStatus, TaskState};
pub use task::{TaskRecord, TransitionRecord, PRIORITY_APPROVED, PRIORITY_NORMAL, PRIORITY_RESUMED};
