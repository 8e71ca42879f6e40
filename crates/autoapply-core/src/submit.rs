//! Idempotent submit guard.
//!
//! The one side-effecting step of the whole pipeline is pressing submit. The
//! guard makes it at-most-once per (run, user, apply-target) fingerprint:
//! a crash between "external submit succeeded" and "state persisted as
//! SUBMITTED" leads to a retry that finds the fingerprint and completes the
//! bookkeeping without touching the external site again.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::domain::{CoreError, RunId, TaskRecord, TaskState, UserId};
use crate::ports::clock::Clock;
use crate::ports::executor::ApplicationExecutor;
use crate::ports::store::{TaskStore, TransitionCtx};

/// How a submission concluded. `Duplicate` is a success, not an error: the
/// external submission already happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    Submitted,
    Duplicate,
}

/// Deterministic fingerprint of one submission attempt.
pub fn fingerprint(run_id: RunId, user_id: UserId, apply_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(user_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(apply_url.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct SubmitGuard {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn ApplicationExecutor>,
}

impl SubmitGuard {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn ApplicationExecutor>,
    ) -> Self {
        Self {
            store,
            clock,
            executor,
        }
    }

    /// Guarded submit for a `Running` task whose executor reported
    /// ready-to-submit.
    ///
    /// Order matters: the external submit happens before the fingerprint is
    /// recorded, so a crash in between re-runs into the duplicate path, never
    /// into a second external submission of a recorded fingerprint.
    pub async fn submit(
        &self,
        task: &TaskRecord,
        apply_url: &str,
    ) -> Result<SubmitResult, CoreError> {
        let run = self.store.get_run(task.run_id).await?;
        let fp = fingerprint(task.run_id, run.user_id, apply_url);

        if self.store.fingerprint_seen(&fp).await? {
            info!(task = %task.id, "duplicate submission fingerprint, skipping external submit");
            self.finalize(task, &fp, "duplicate submission, completed as no-op")
                .await?;
            return Ok(SubmitResult::Duplicate);
        }

        // Re-validate the session right before the side effect; a dead
        // session fails the task rather than retrying into a stale form.
        if !self.executor.session_valid(task).await {
            warn!(task = %task.id, "session invalid at submit");
            self.store
                .transition(
                    task.id,
                    TaskState::Failed,
                    TransitionCtx::with_error("SESSION_INVALID", "session invalid at submit"),
                )
                .await?;
            return Err(CoreError::SessionInvalidAtSubmit(task.id));
        }

        if let Err(detail) = self.executor.submit(task).await {
            warn!(task = %task.id, %detail, "external submit failed");
            self.store
                .transition(
                    task.id,
                    TaskState::Failed,
                    TransitionCtx::with_error("SUBMIT_FAILED", detail.clone()),
                )
                .await?;
            return Err(CoreError::SubmitFailed {
                task_id: task.id,
                detail,
            });
        }

        self.finalize(task, &fp, "submission confirmed").await?;
        Ok(SubmitResult::Submitted)
    }

    /// Bookkeeping for a submission the executor confirmed on its own
    /// (`ExecutorOutcome::Success`): same fingerprint and catalog updates,
    /// no second external side effect.
    pub async fn confirm(&self, task: &TaskRecord, apply_url: &str) -> Result<(), CoreError> {
        let run = self.store.get_run(task.run_id).await?;
        let fp = fingerprint(task.run_id, run.user_id, apply_url);
        self.finalize(task, &fp, "submission confirmed by executor")
            .await
    }

    async fn finalize(&self, task: &TaskRecord, fp: &str, reason: &str) -> Result<(), CoreError> {
        self.store.record_fingerprint(fp).await?;
        self.store
            .transition(task.id, TaskState::Submitted, TransitionCtx::with_reason(reason))
            .await?;
        self.store
            .mark_job_applied(task.job_id, self.clock.now())
            .await?;
        Ok(())
    }
}
