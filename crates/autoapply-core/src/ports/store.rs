//! TaskStore port: the contract the durable store must honor.
//!
//! The relational store behind this trait is the single source of truth for
//! runs, tasks, and approvals. The in-memory implementation in `store::memory`
//! honors the same contract and is what tests and the demo binary run on.
//!
//! Two rules are load-bearing:
//! - `transition` is the only way any caller changes a task's `state`. There
//!   is no other write path, so invariants live in exactly one place.
//! - `claim_next` must behave like "select one eligible row, lock it, skip
//!   rows locked by others": two concurrent claims never return the same
//!   task, and a claim that loses the race sees empty, it does not block.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    ApprovalId, ApprovalRequest, ApprovalStatus, CoreError, JobId, RunId, RunRecord, RunStatus,
    TaskId, TaskRecord, TaskState, TransitionRecord, UserId,
};

/// Side data applied atomically with a state transition.
///
/// Everything here is optional: a plain transition carries none of it. The
/// store applies target-specific effects on top (entering `Running` stamps
/// `started_at` and bumps `attempt_count`; entering `Queued` refreshes
/// `queued_at` so requeued work queues FIFO-fairly at its priority).
#[derive(Debug, Clone, Default)]
pub struct TransitionCtx {
    pub reason: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Priority override, e.g. the resume or approval boost.
    pub priority: Option<i32>,
    /// Opaque executor checkpoint to carry across a pause.
    pub checkpoint: Option<serde_json::Value>,
}

impl TransitionCtx {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    // ----- runs -----

    /// Create a run in `Running` status. Fails with `ActiveRunExists` if any
    /// run is already running (single-writer batch invariant).
    async fn create_run(
        &self,
        user_id: UserId,
        settings_snapshot: serde_json::Value,
        batch_size: Option<u32>,
    ) -> Result<RunRecord, CoreError>;

    async fn get_run(&self, run_id: RunId) -> Result<RunRecord, CoreError>;

    /// Run-level command: pause/stop/complete (or restart, subject to the
    /// single-running invariant).
    async fn set_run_status(&self, run_id: RunId, status: RunStatus) -> Result<RunRecord, CoreError>;

    /// Delete a run and cascade to its tasks and their approvals.
    async fn delete_run(&self, run_id: RunId) -> Result<(), CoreError>;

    // ----- tasks -----

    /// Attach a job to a run as a `Queued` task. Fails with `DuplicateTask`
    /// if the (run, job) pair already exists.
    async fn enqueue_task(&self, run_id: RunId, job_id: JobId) -> Result<TaskRecord, CoreError>;

    async fn get_task(&self, task_id: TaskId) -> Result<TaskRecord, CoreError>;

    async fn list_tasks(
        &self,
        run_id: RunId,
        state: Option<TaskState>,
    ) -> Result<Vec<TaskRecord>, CoreError>;

    /// The single permitted mutator of task state. Validates the target
    /// against the allowed-transition table, stamps `last_state_change_at`,
    /// appends an immutable transition-log record, and applies `ctx`.
    /// `InvalidTransition` leaves the task untouched.
    async fn transition(
        &self,
        task_id: TaskId,
        target: TaskState,
        ctx: TransitionCtx,
    ) -> Result<TaskRecord, CoreError>;

    /// Dequeue primitive: select one `Queued` task of the run ordered by
    /// (priority DESC, queued_at ASC), claim it exclusively, and flip it to
    /// `Running` in the same critical section. `Ok(None)` when nothing is
    /// eligible; losing a race is "empty", never an error and never a wait.
    async fn claim_next(&self, run_id: RunId) -> Result<Option<TaskRecord>, CoreError>;

    /// Tasks in `Running` whose `last_state_change_at` is older than the
    /// cutoff, across all runs. Input for the recovery sweep.
    async fn stale_running_tasks(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, CoreError>;

    /// Transition log for one task, oldest first.
    async fn transition_log(&self, task_id: TaskId) -> Result<Vec<TransitionRecord>, CoreError>;

    // ----- approvals -----

    /// Insert a new pending approval. Fails with `ApprovalAlreadyPending` if
    /// the task already has one.
    async fn insert_approval(&self, approval: ApprovalRequest) -> Result<(), CoreError>;

    async fn approval_by_token(&self, token: &str) -> Result<ApprovalRequest, CoreError>;

    async fn pending_approvals(&self) -> Result<Vec<ApprovalRequest>, CoreError>;

    /// Resolve a pending approval exactly once. `approved_at` is stamped when
    /// the resolution is `Approved`.
    async fn resolve_approval(
        &self,
        approval_id: ApprovalId,
        status: ApprovalStatus,
    ) -> Result<ApprovalRequest, CoreError>;

    // ----- idempotency fingerprints -----

    /// Record a submission fingerprint. Returns `true` if it was new, `false`
    /// if a submission with this fingerprint already completed.
    async fn record_fingerprint(&self, fingerprint: &str) -> Result<bool, CoreError>;

    async fn fingerprint_seen(&self, fingerprint: &str) -> Result<bool, CoreError>;

    // ----- job catalog flags -----

    /// Set the catalog-level duplicate-application guard on confirmed submit.
    async fn mark_job_applied(&self, job_id: JobId, at: DateTime<Utc>) -> Result<(), CoreError>;

    async fn job_applied_at(&self, job_id: JobId) -> Result<Option<DateTime<Utc>>, CoreError>;
}
