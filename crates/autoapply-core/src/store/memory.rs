//! In-memory implementation of the `TaskStore` contract.
//!
//! One `tokio::sync::Mutex` guards the whole state, so every store operation
//! is a transaction: `claim_next` selects, claims, and flips to `Running`
//! without ever releasing the lock, which is exactly the "lock one row, skip
//! rows locked by others" dequeue primitive. A claim that finds nothing
//! eligible returns empty immediately; it never waits on another claimant.
//!
//! Process-scoped by design: the durable relational store is an external
//! collaborator, and this implementation honors the same contract for tests
//! and single-process deployments.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::{
    ApprovalId, ApprovalRequest, ApprovalStatus, CoreError, JobId, RunId, RunRecord, RunStatus,
    TaskId, TaskRecord, TaskState, TransitionRecord, UserId,
};
use crate::ports::clock::Clock;
use crate::ports::store::{TaskStore, TransitionCtx};

struct Inner {
    runs: HashMap<RunId, RunRecord>,
    tasks: HashMap<TaskId, TaskRecord>,

    /// Insertion order of tasks; the last tie-break after (priority,
    /// queued_at) so ordering is deterministic even under a fixed clock.
    task_seq: HashMap<TaskId, u64>,
    next_seq: u64,

    approvals: HashMap<ApprovalId, ApprovalRequest>,

    /// Immutable transition history, append-only.
    transition_log: Vec<TransitionRecord>,

    /// Fingerprints of completed submissions.
    fingerprints: HashSet<String>,

    /// Catalog-level duplicate-application guard: job -> last_applied_at.
    applied_jobs: HashMap<JobId, DateTime<Utc>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            runs: HashMap::new(),
            tasks: HashMap::new(),
            task_seq: HashMap::new(),
            next_seq: 0,
            approvals: HashMap::new(),
            transition_log: Vec::new(),
            fingerprints: HashSet::new(),
            applied_jobs: HashMap::new(),
        }
    }

    /// The single write path for task state. Validates against the
    /// allowed-transition table, leaves the task untouched on a bad target,
    /// and appends to the log on success.
    fn apply_transition(
        &mut self,
        task_id: TaskId,
        target: TaskState,
        ctx: TransitionCtx,
        now: DateTime<Utc>,
    ) -> Result<TaskRecord, CoreError> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(CoreError::TaskNotFound(task_id))?;

        let from = task.state;
        if !from.can_transition_to(target) {
            return Err(CoreError::InvalidTransition {
                task_id,
                from,
                to: target,
            });
        }

        // last_state_change_at is monotonically non-decreasing even if the
        // clock is not.
        let at = now.max(task.last_state_change_at);

        task.state = target;
        task.last_state_change_at = at;

        if let Some(code) = ctx.error_code {
            task.last_error_code = Some(code);
        }
        if let Some(message) = ctx.error_message {
            task.last_error_message = Some(message);
        }
        if let Some(priority) = ctx.priority {
            task.priority = priority;
        }
        if let Some(checkpoint) = ctx.checkpoint {
            task.checkpoint = Some(checkpoint);
        }

        match target {
            TaskState::Running => {
                task.started_at = Some(at);
                task.attempt_count += 1;
            }
            TaskState::Queued => {
                // Requeued work queues FIFO-fairly at its priority.
                task.queued_at = at;
            }
            _ => {}
        }

        info!(task = %task_id, %from, to = %target, reason = ctx.reason.as_deref(), "task transition");

        self.transition_log.push(TransitionRecord {
            task_id,
            from,
            to: target,
            at,
            reason: ctx.reason,
        });

        Ok(task.clone())
    }
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            clock,
        }
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create_run(
        &self,
        user_id: UserId,
        settings_snapshot: serde_json::Value,
        batch_size: Option<u32>,
    ) -> Result<RunRecord, CoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        if let Some(active) = inner
            .runs
            .values()
            .find(|r| r.status == RunStatus::Running)
        {
            return Err(CoreError::ActiveRunExists(active.id));
        }

        let run = RunRecord::new(user_id, settings_snapshot, batch_size, now);
        info!(run = %run.id, user = %user_id, "run created");
        inner.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, run_id: RunId) -> Result<RunRecord, CoreError> {
        let inner = self.inner.lock().await;
        inner
            .runs
            .get(&run_id)
            .cloned()
            .ok_or(CoreError::RunNotFound(run_id))
    }

    async fn set_run_status(
        &self,
        run_id: RunId,
        status: RunStatus,
    ) -> Result<RunRecord, CoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        if status == RunStatus::Running
            && let Some(active) = inner
                .runs
                .values()
                .find(|r| r.status == RunStatus::Running && r.id != run_id)
        {
            return Err(CoreError::ActiveRunExists(active.id));
        }

        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(CoreError::RunNotFound(run_id))?;
        run.status = status;
        run.updated_at = now;
        info!(run = %run_id, %status, "run status changed");
        Ok(run.clone())
    }

    async fn delete_run(&self, run_id: RunId) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .runs
            .remove(&run_id)
            .ok_or(CoreError::RunNotFound(run_id))?;

        // Cascade: tasks of the run, and approvals of those tasks.
        let task_ids: Vec<TaskId> = inner
            .tasks
            .values()
            .filter(|t| t.run_id == run_id)
            .map(|t| t.id)
            .collect();
        for task_id in &task_ids {
            inner.tasks.remove(task_id);
            inner.task_seq.remove(task_id);
        }
        inner
            .approvals
            .retain(|_, a| !task_ids.contains(&a.task_id));
        Ok(())
    }

    async fn enqueue_task(&self, run_id: RunId, job_id: JobId) -> Result<TaskRecord, CoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        if !inner.runs.contains_key(&run_id) {
            return Err(CoreError::RunNotFound(run_id));
        }
        if inner
            .tasks
            .values()
            .any(|t| t.run_id == run_id && t.job_id == job_id)
        {
            return Err(CoreError::DuplicateTask { run_id, job_id });
        }

        let task = TaskRecord::new(run_id, job_id, now);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.task_seq.insert(task.id, seq);
        info!(task = %task.id, run = %run_id, job = %job_id, "task enqueued");
        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, task_id: TaskId) -> Result<TaskRecord, CoreError> {
        let inner = self.inner.lock().await;
        inner
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(CoreError::TaskNotFound(task_id))
    }

    async fn list_tasks(
        &self,
        run_id: RunId,
        state: Option<TaskState>,
    ) -> Result<Vec<TaskRecord>, CoreError> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<TaskRecord> = inner
            .tasks
            .values()
            .filter(|t| t.run_id == run_id && state.is_none_or(|s| t.state == s))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| inner.task_seq.get(&t.id).copied().unwrap_or(u64::MAX));
        Ok(tasks)
    }

    async fn transition(
        &self,
        task_id: TaskId,
        target: TaskState,
        ctx: TransitionCtx,
    ) -> Result<TaskRecord, CoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.apply_transition(task_id, target, ctx, now)
    }

    async fn claim_next(&self, run_id: RunId) -> Result<Option<TaskRecord>, CoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        // Select + claim + flip to Running under one lock: a concurrent
        // claimant either sees this task already Running (and skips it) or
        // never sees it at all. Ordering: priority DESC, queued_at ASC,
        // insertion order ASC.
        let candidate = inner
            .tasks
            .values()
            .filter(|t| t.run_id == run_id && t.state.is_runnable())
            .map(|t| {
                let seq = inner.task_seq.get(&t.id).copied().unwrap_or(u64::MAX);
                (t.id, t.priority, t.queued_at, seq)
            })
            .min_by_key(|&(_, priority, queued_at, seq)| (-priority, queued_at, seq));

        let Some((task_id, ..)) = candidate else {
            return Ok(None);
        };

        let task = inner.apply_transition(
            task_id,
            TaskState::Running,
            TransitionCtx::with_reason("claimed by worker"),
            now,
        )?;
        Ok(Some(task))
    }

    async fn stale_running_tasks(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, CoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Running && t.last_state_change_at < older_than)
            .cloned()
            .collect())
    }

    async fn transition_log(&self, task_id: TaskId) -> Result<Vec<TransitionRecord>, CoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .transition_log
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn insert_approval(&self, approval: ApprovalRequest) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        if inner
            .approvals
            .values()
            .any(|a| a.task_id == approval.task_id && a.status == ApprovalStatus::Pending)
        {
            return Err(CoreError::ApprovalAlreadyPending(approval.task_id));
        }
        inner.approvals.insert(approval.id, approval);
        Ok(())
    }

    async fn approval_by_token(&self, token: &str) -> Result<ApprovalRequest, CoreError> {
        let inner = self.inner.lock().await;
        inner
            .approvals
            .values()
            .find(|a| a.token == token)
            .cloned()
            .ok_or(CoreError::TokenNotFound)
    }

    async fn pending_approvals(&self) -> Result<Vec<ApprovalRequest>, CoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .approvals
            .values()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .cloned()
            .collect())
    }

    async fn resolve_approval(
        &self,
        approval_id: ApprovalId,
        status: ApprovalStatus,
    ) -> Result<ApprovalRequest, CoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let approval = inner
            .approvals
            .get_mut(&approval_id)
            .ok_or(CoreError::TokenNotFound)?;

        // Approvals resolve exactly once; a second resolution fails closed.
        if approval.status != ApprovalStatus::Pending {
            return Err(CoreError::TokenAlreadyUsed);
        }

        approval.status = status;
        if status == ApprovalStatus::Approved {
            approval.approved_at = Some(now);
        }
        info!(approval = %approval_id, task = %approval.task_id, %status, "approval resolved");
        Ok(approval.clone())
    }

    async fn record_fingerprint(&self, fingerprint: &str) -> Result<bool, CoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.fingerprints.insert(fingerprint.to_owned()))
    }

    async fn fingerprint_seen(&self, fingerprint: &str) -> Result<bool, CoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.fingerprints.contains(fingerprint))
    }

    async fn mark_job_applied(&self, job_id: JobId, at: DateTime<Utc>) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        inner.applied_jobs.insert(job_id, at);
        Ok(())
    }

    async fn job_applied_at(&self, job_id: JobId) -> Result<Option<DateTime<Utc>>, CoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.applied_jobs.get(&job_id).copied())
    }
}
