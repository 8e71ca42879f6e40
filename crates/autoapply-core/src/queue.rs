//! Queue service: dequeue, stuck-task recovery, manual resume, retry policy.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::domain::{CoreError, RunId, TaskId, TaskRecord, TaskState};
use crate::ports::clock::Clock;
use crate::ports::store::{TaskStore, TransitionCtx};

pub struct QueueService {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    config: CoreConfig,
}

impl QueueService {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, config: CoreConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Claim the next eligible task of the run. `Ok(None)` means empty, which
    /// includes the run no longer claiming: a stopped or paused run stops
    /// taking new work but never aborts a task already running.
    pub async fn dequeue_next(&self, run_id: RunId) -> Result<Option<TaskRecord>, CoreError> {
        let run = self.store.get_run(run_id).await?;
        if !run.is_claiming() {
            return Ok(None);
        }
        self.store.claim_next(run_id).await
    }

    /// Requeue tasks stuck in `Running` past the configured timeout, treating
    /// them as crashed mid-processing. Tasks whose attempt budget is spent go
    /// to `Failed` instead of looping forever.
    ///
    /// Idempotent: requeueing refreshes `last_state_change_at`, so a second
    /// sweep over the same window finds nothing.
    pub async fn recover_stuck_tasks(&self) -> Result<usize, CoreError> {
        let cutoff = self.clock.now() - self.config.stuck_timeout;
        let stuck = self.store.stale_running_tasks(cutoff).await?;
        let recovered = stuck.len();

        for task in stuck {
            if task.attempt_count >= self.config.max_attempts {
                warn!(task = %task.id, attempts = task.attempt_count, "stuck task out of attempts");
                self.store
                    .transition(
                        task.id,
                        TaskState::Failed,
                        TransitionCtx::with_error(
                            "MAX_ATTEMPTS_EXCEEDED",
                            format!(
                                "task stuck in RUNNING after {} attempts",
                                task.attempt_count
                            ),
                        ),
                    )
                    .await?;
            } else {
                info!(task = %task.id, attempts = task.attempt_count, "recovering stuck task");
                self.store
                    .transition(
                        task.id,
                        TaskState::Queued,
                        TransitionCtx::with_reason("stuck-task recovery"),
                    )
                    .await?;
            }
        }
        Ok(recovered)
    }

    /// Manual resume of a parked task (`Failed`, `NeedsAuth`, `NeedsUser`).
    /// Boosted priority serves resumed work ahead of the default backlog;
    /// ties at equal priority stay FIFO. `Expired` is not resumable: re-running
    /// an expired task means attaching the job to the run again.
    pub async fn resume_task(
        &self,
        task_id: TaskId,
        priority_boost: bool,
    ) -> Result<TaskRecord, CoreError> {
        let task = self.store.get_task(task_id).await?;
        if !matches!(
            task.state,
            TaskState::Failed | TaskState::NeedsAuth | TaskState::NeedsUser
        ) {
            return Err(CoreError::NotResumable {
                task_id,
                state: task.state,
            });
        }

        let ctx = TransitionCtx {
            reason: Some("manual resume".into()),
            priority: priority_boost.then_some(self.config.resume_priority),
            ..Default::default()
        };
        info!(task = %task_id, boost = priority_boost, "task resumed");
        self.store.transition(task_id, TaskState::Queued, ctx).await
    }

    /// Retry policy for transient executor failures: one automatic requeue,
    /// then `Failed` until someone resumes it. `NeedsAuth`/`NeedsUser` never
    /// pass through here; they always wait for an explicit user signal.
    pub async fn requeue_or_fail(
        &self,
        task: &TaskRecord,
        detail: &str,
    ) -> Result<TaskRecord, CoreError> {
        if task.attempt_count >= self.config.max_attempts {
            warn!(task = %task.id, attempts = task.attempt_count, "transient failure, budget spent");
            self.store
                .transition(
                    task.id,
                    TaskState::Failed,
                    TransitionCtx::with_error("TRANSIENT_ERROR", detail),
                )
                .await
        } else {
            info!(task = %task.id, attempts = task.attempt_count, "transient failure, retrying once");
            self.store
                .transition(
                    task.id,
                    TaskState::Queued,
                    TransitionCtx {
                        reason: Some("transient retry".into()),
                        error_code: Some("TRANSIENT_ERROR".into()),
                        error_message: Some(detail.into()),
                        ..Default::default()
                    },
                )
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, RunStatus, UserId, PRIORITY_RESUMED};
    use crate::ports::clock::FixedClock;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<FixedClock>,
        queue: QueueService,
        run_id: RunId,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::at(Utc::now()));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let run = store
            .create_run(UserId::new(), serde_json::json!({}), None)
            .await
            .unwrap();
        let queue = QueueService::new(store.clone(), clock.clone(), CoreConfig::default());
        Fixture {
            store,
            clock,
            queue,
            run_id: run.id,
        }
    }

    #[tokio::test]
    async fn stopped_run_stops_claiming() {
        let f = fixture().await;
        f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();
        f.store
            .set_run_status(f.run_id, RunStatus::Stopped)
            .await
            .unwrap();

        assert!(f.queue.dequeue_next(f.run_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recovery_requeues_stale_and_skips_fresh() {
        let f = fixture().await;
        let stale = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();
        f.queue.dequeue_next(f.run_id).await.unwrap().unwrap();

        // 16 minutes later the first task is stale; a second task claimed now
        // is fresh.
        f.clock.advance(Duration::minutes(16));
        let fresh = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();
        f.queue.dequeue_next(f.run_id).await.unwrap().unwrap();

        let recovered = f.queue.recover_stuck_tasks().await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(
            f.store.get_task(stale.id).await.unwrap().state,
            TaskState::Queued
        );
        assert_eq!(
            f.store.get_task(fresh.id).await.unwrap().state,
            TaskState::Running
        );

        // Second pass finds nothing: the requeue refreshed the timestamp.
        assert_eq!(f.queue.recover_stuck_tasks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recovery_fails_task_with_spent_attempt_budget() {
        let f = fixture().await;
        let task = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();

        // Two stuck claims in a row exhaust the default budget of 2.
        for _ in 0..2 {
            f.queue.dequeue_next(f.run_id).await.unwrap().unwrap();
            f.clock.advance(Duration::minutes(16));
            f.queue.recover_stuck_tasks().await.unwrap();
        }

        let task = f.store.get_task(task.id).await.unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.last_error_code.as_deref(), Some("MAX_ATTEMPTS_EXCEEDED"));
    }

    #[tokio::test]
    async fn resume_boosts_priority_and_requeues() {
        let f = fixture().await;
        let task = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();
        f.queue.dequeue_next(f.run_id).await.unwrap().unwrap();
        f.store
            .transition(
                task.id,
                TaskState::Failed,
                TransitionCtx::with_error("FATAL_ERROR", "boom"),
            )
            .await
            .unwrap();

        let resumed = f.queue.resume_task(task.id, true).await.unwrap();
        assert_eq!(resumed.state, TaskState::Queued);
        assert_eq!(resumed.priority, PRIORITY_RESUMED);
    }

    #[tokio::test]
    async fn expired_task_is_not_resumable() {
        let f = fixture().await;
        let task = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();
        f.queue.dequeue_next(f.run_id).await.unwrap().unwrap();
        f.store
            .transition(task.id, TaskState::Expired, TransitionCtx::default())
            .await
            .unwrap();

        let err = f.queue.resume_task(task.id, true).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::NotResumable {
                state: TaskState::Expired,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn transient_failure_retries_once_then_fails() {
        let f = fixture().await;
        let task = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();

        // First attempt fails transiently: requeued.
        let task = f.queue.dequeue_next(f.run_id).await.unwrap().unwrap();
        let task = f.queue.requeue_or_fail(&task, "timeout").await.unwrap();
        assert_eq!(task.state, TaskState::Queued);

        // Second attempt fails transiently: permanent.
        let task = f.queue.dequeue_next(f.run_id).await.unwrap().unwrap();
        assert_eq!(task.attempt_count, 2);
        let task = f.queue.requeue_or_fail(&task, "timeout").await.unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.last_error_code.as_deref(), Some("TRANSIENT_ERROR"));
    }
}
