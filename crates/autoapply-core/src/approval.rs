//! Approval lifecycle: create, approve, reject, expire.
//!
//! An approval gates the one side-effecting step of a task when the target
//! site offers no save/draft capability. The token is single-use and
//! time-boxed; expiry is checked lazily on every access and by the periodic
//! sweep, whichever comes first.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::domain::{ApprovalRequest, ApprovalStatus, CoreError, TaskId, TaskRecord, TaskState};
use crate::ports::clock::Clock;
use crate::ports::notifier::ApprovalNotifier;
use crate::ports::store::{TaskStore, TransitionCtx};
use crate::signal::InterruptSignal;

pub struct ApprovalService {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn ApprovalNotifier>,
    signal: Arc<InterruptSignal>,
    config: CoreConfig,
}

impl ApprovalService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn ApprovalNotifier>,
        signal: Arc<InterruptSignal>,
        config: CoreConfig,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            signal,
            config,
        }
    }

    /// Create an approval for a task that reached final review. Only valid
    /// while the task is `Running`; transitions it to `PendingApproval` and
    /// dispatches the notification. A dispatch failure is reported in the log
    /// but never rolls back the approval record.
    pub async fn create(
        &self,
        task_id: TaskId,
        form_snapshot: serde_json::Value,
    ) -> Result<ApprovalRequest, CoreError> {
        let task = self.store.get_task(task_id).await?;
        if task.state != TaskState::Running {
            return Err(CoreError::NotAwaitingApproval {
                task_id,
                state: task.state,
            });
        }

        let approval = ApprovalRequest::new(
            task_id,
            form_snapshot,
            self.config.approval_ttl,
            self.clock.now(),
        );
        self.store.insert_approval(approval.clone()).await?;
        self.store
            .transition(
                task_id,
                TaskState::PendingApproval,
                TransitionCtx::with_reason("final review, no draft capability"),
            )
            .await?;

        info!(approval = %approval.id, task = %task_id, expires_at = %approval.expires_at, "approval created");
        if let Err(e) = self.notifier.notify(&approval).await {
            warn!(approval = %approval.id, error = %e, "approval notification failed");
        }
        Ok(approval)
    }

    /// Consume a token to approve. On success the task is `Approved` with a
    /// priority boost and the worker is interrupted. An elapsed TTL resolves
    /// the approval and expires the task before reporting `TokenExpired`.
    pub async fn approve(&self, token: &str) -> Result<TaskRecord, CoreError> {
        let approval = self.consume_pending(token).await?;

        self.store
            .resolve_approval(approval.id, ApprovalStatus::Approved)
            .await?;
        let task = self
            .store
            .transition(
                approval.task_id,
                TaskState::Approved,
                TransitionCtx {
                    reason: Some("user approved submission".into()),
                    priority: Some(self.config.approved_priority),
                    ..Default::default()
                },
            )
            .await?;

        info!(approval = %approval.id, task = %task.id, "approved, interrupting worker");
        self.signal.raise();
        Ok(task)
    }

    /// Consume a token to reject. The task lands in terminal `Rejected`;
    /// re-running means a fresh task, never a silent resubmit of stale form
    /// state.
    pub async fn reject(&self, token: &str, notes: Option<String>) -> Result<TaskRecord, CoreError> {
        let approval = self.consume_pending(token).await?;

        self.store
            .resolve_approval(approval.id, ApprovalStatus::Rejected)
            .await?;
        let reason = notes.unwrap_or_else(|| "user rejected submission".into());
        self.store
            .transition(
                approval.task_id,
                TaskState::Rejected,
                TransitionCtx::with_reason(reason),
            )
            .await
    }

    /// Periodic expiry sweep for approvals nobody touched. Idempotent: an
    /// expired approval is no longer pending, so the next pass skips it.
    pub async fn expire_sweep(&self) -> Result<usize, CoreError> {
        let now = self.clock.now();
        let mut expired = 0;
        for approval in self.store.pending_approvals().await? {
            if approval.is_expired_at(now) {
                self.expire(&approval).await?;
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Shared lookup + single-use + lazy-TTL checks.
    async fn consume_pending(&self, token: &str) -> Result<ApprovalRequest, CoreError> {
        let approval = self.store.approval_by_token(token).await?;
        if approval.status != ApprovalStatus::Pending {
            return Err(CoreError::TokenAlreadyUsed);
        }
        if approval.is_expired_at(self.clock.now()) {
            self.expire(&approval).await?;
            return Err(CoreError::TokenExpired);
        }
        Ok(approval)
    }

    async fn expire(&self, approval: &ApprovalRequest) -> Result<(), CoreError> {
        info!(approval = %approval.id, task = %approval.task_id, "approval expired");
        self.store
            .resolve_approval(approval.id, ApprovalStatus::Expired)
            .await?;
        self.store
            .transition(
                approval.task_id,
                TaskState::Expired,
                TransitionCtx::with_reason("approval TTL elapsed"),
            )
            .await?;
        Ok(())
    }
}
