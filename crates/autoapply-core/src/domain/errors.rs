//! Core error taxonomy.

use thiserror::Error;

use super::ids::{JobId, RunId, TaskId};
use super::state::TaskState;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Attempted state change outside the allowed-transition table. Always a
    /// programming or race bug; never swallowed.
    #[error("invalid transition from {from} to {to} for {task_id}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("run {0} not found")]
    RunNotFound(RunId),

    /// A job is never double-enqueued in the same run.
    #[error("job {job_id} is already enqueued in run {run_id}")]
    DuplicateTask { run_id: RunId, job_id: JobId },

    /// At most one run may be `running` system-wide.
    #[error("run {0} is already running; complete or stop it first")]
    ActiveRunExists(RunId),

    /// At most one pending approval per task.
    #[error("task {0} already has a pending approval")]
    ApprovalAlreadyPending(TaskId),

    /// Approval was requested for a task that is not at a review checkpoint.
    #[error("task {task_id} is {state}, approval requires RUNNING")]
    NotAwaitingApproval { task_id: TaskId, state: TaskState },

    #[error("approval token not found")]
    TokenNotFound,

    /// A token is consumable exactly once; the second attempt fails closed.
    #[error("approval token already used")]
    TokenAlreadyUsed,

    #[error("approval token expired")]
    TokenExpired,

    /// Pre-submit re-validation failed; the task is failed, never retried
    /// silently.
    #[error("session invalid at submit for task {0}")]
    SessionInvalidAtSubmit(TaskId),

    /// The external submit itself failed after passing the guard checks.
    #[error("submit failed for task {task_id}: {detail}")]
    SubmitFailed { task_id: TaskId, detail: String },

    /// Resume requested for a task that is not in a resumable state.
    #[error("task {task_id} is {state} and cannot be resumed")]
    NotResumable { task_id: TaskId, state: TaskState },
}
