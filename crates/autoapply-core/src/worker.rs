//! Worker loop: the single consumer that ties everything together.
//!
//! One sequential loop per process: drain pending approval interrupts,
//! dequeue the next task, hand it to the external executor, interpret the
//! outcome as a state transition. The executor invocation is the only
//! long-blocking call in the system; everything else is short and
//! transactional.
//!
//! One bad task never stalls the batch: the loop converts per-task errors
//! into state transitions and log lines, it does not crash.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::approval::ApprovalService;
use crate::config::CoreConfig;
use crate::domain::{CoreError, ExecutorOutcome, RunId, TaskRecord, TaskState};
use crate::ports::executor::ApplicationExecutor;
use crate::ports::store::{TaskStore, TransitionCtx};
use crate::queue::QueueService;
use crate::signal::InterruptSignal;
use crate::submit::SubmitGuard;

pub struct Worker {
    run_id: RunId,
    store: Arc<dyn TaskStore>,
    queue: Arc<QueueService>,
    approvals: Arc<ApprovalService>,
    executor: Arc<dyn ApplicationExecutor>,
    guard: SubmitGuard,
    signal: Arc<InterruptSignal>,
    config: CoreConfig,
}

/// Handle to a spawned loop. Dropping the handle does not stop the loop;
/// call `shutdown_and_join`. Shutdown is graceful: no new claims, in-flight
/// work finishes naturally.
pub struct LoopHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    pub fn request_shutdown(&self) {
        // Receivers may already be gone; that just means the loop exited.
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: RunId,
        store: Arc<dyn TaskStore>,
        queue: Arc<QueueService>,
        approvals: Arc<ApprovalService>,
        executor: Arc<dyn ApplicationExecutor>,
        guard: SubmitGuard,
        signal: Arc<InterruptSignal>,
        config: CoreConfig,
    ) -> Self {
        Self {
            run_id,
            store,
            queue,
            approvals,
            executor,
            guard,
            signal,
            config,
        }
    }

    /// Spawn the loop on the runtime.
    pub fn spawn(self) -> LoopHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        LoopHandle { shutdown_tx, join }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(run = %self.run_id, "worker started");
        // The interrupt flag is process-scoped; `Approved` rows in the store
        // may predate this process. Raise once so the first tick drains them.
        self.signal.raise();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let worked = self.tick().await;
            if !worked {
                // Idle: wake on shutdown, an approval interrupt, or the poll
                // timer, whichever first.
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = self.signal.wait() => {}
                    _ = tokio::time::sleep(self.config.idle_poll) => {}
                }
            }
        }
        info!(run = %self.run_id, "worker stopped");
    }

    /// One scheduling decision: approval drain if signaled, then one dequeue.
    /// Returns whether any task was processed. Public so tests can drive the
    /// loop deterministically.
    pub async fn tick(&self) -> bool {
        let mut worked = false;

        if self.signal.is_raised() {
            // Clear before scanning: an approval landing mid-drain re-raises
            // the level and the next tick re-scans, so no wakeup is lost. The
            // scan itself looks at every currently-approved task, not just
            // whichever approval raised the flag, so bursts coalesce.
            self.signal.clear();
            worked |= self.drain_approved().await;
        }

        match self.queue.dequeue_next(self.run_id).await {
            Ok(Some(task)) => {
                self.process(task).await;
                worked = true;
            }
            Ok(None) => {}
            Err(e) => error!(run = %self.run_id, error = %e, "dequeue failed"),
        }
        worked
    }

    /// Process every task currently in `Approved`, oldest first. Approved
    /// work owns the external session next: it is time-boxed by the session
    /// lifetime, so it preempts the normal backlog.
    async fn drain_approved(&self) -> bool {
        let approved = match self
            .store
            .list_tasks(self.run_id, Some(TaskState::Approved))
            .await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(run = %self.run_id, error = %e, "approved-task scan failed");
                return false;
            }
        };

        let mut worked = false;
        for task in approved {
            match self
                .store
                .transition(
                    task.id,
                    TaskState::Running,
                    TransitionCtx::with_reason("approval interrupt"),
                )
                .await
            {
                Ok(task) => {
                    self.process(task).await;
                    worked = true;
                }
                // Raced by expiry or another resolution path; surfaced, then
                // move on to the rest of the drain.
                Err(e) => warn!(task = %task.id, error = %e, "approved task no longer runnable"),
            }
        }
        worked
    }

    /// Execute one claimed task and absorb its errors. Isolation boundary:
    /// errors become transitions and log lines here, never loop exits.
    async fn process(&self, task: TaskRecord) {
        let outcome = self.executor.run(&task).await;
        if let Err(e) = self.apply_outcome(&task, outcome).await {
            error!(task = %task.id, error = %e, "failed to record task outcome");
        }
    }

    /// Interpret the executor's report as a state transition.
    async fn apply_outcome(
        &self,
        task: &TaskRecord,
        outcome: ExecutorOutcome,
    ) -> Result<(), CoreError> {
        match outcome {
            ExecutorOutcome::NeedsAuth => {
                self.store
                    .transition(
                        task.id,
                        TaskState::NeedsAuth,
                        TransitionCtx::with_reason("authentication required"),
                    )
                    .await?;
            }
            ExecutorOutcome::NeedsUserInput => {
                self.store
                    .transition(
                        task.id,
                        TaskState::NeedsUser,
                        TransitionCtx::with_reason("user input required"),
                    )
                    .await?;
            }
            ExecutorOutcome::ReachedFinalReview(form_snapshot) => {
                self.approvals.create(task.id, form_snapshot).await?;
            }
            ExecutorOutcome::ReadyToSubmit { apply_url } => {
                match self.guard.submit(task, &apply_url).await {
                    Ok(_) => {}
                    // Both cases already transitioned the task to Failed with
                    // an error code; nothing further to record.
                    Err(CoreError::SessionInvalidAtSubmit(_))
                    | Err(CoreError::SubmitFailed { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            ExecutorOutcome::Success { apply_url } => {
                self.guard.confirm(task, &apply_url).await?;
            }
            ExecutorOutcome::Paused { checkpoint } => {
                // Clean mid-task yield for an approval interrupt: back to the
                // queue with resume metadata, priority untouched.
                self.store
                    .transition(
                        task.id,
                        TaskState::Queued,
                        TransitionCtx {
                            reason: Some("paused for approval interrupt".into()),
                            checkpoint: Some(checkpoint),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            ExecutorOutcome::TransientError(detail) => {
                self.queue.requeue_or_fail(task, &detail).await?;
            }
            ExecutorOutcome::FatalError(detail) => {
                self.store
                    .transition(
                        task.id,
                        TaskState::Failed,
                        TransitionCtx::with_error("FATAL_ERROR", detail),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

/// Periodic maintenance, independent of the worker: stuck-task recovery and
/// approval expiry. Both passes are idempotent, so overlapping or repeated
/// runs are harmless.
pub fn spawn_maintenance(
    queue: Arc<QueueService>,
    approvals: Arc<ApprovalService>,
    interval: std::time::Duration,
) -> LoopHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = queue.recover_stuck_tasks().await {
                        error!(error = %e, "stuck-task recovery failed");
                    }
                    if let Err(e) = approvals.expire_sweep().await {
                        error!(error = %e, "approval expiry sweep failed");
                    }
                }
            }
        }
    });
    LoopHandle { shutdown_tx, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, UserId};
    use crate::ports::clock::{FixedClock, SystemClock};
    use crate::ports::notifier::NoopNotifier;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Executor double that replays a fixed script of outcomes.
    struct ScriptedExecutor {
        script: Mutex<VecDeque<ExecutorOutcome>>,
    }

    impl ScriptedExecutor {
        fn new(outcomes: impl IntoIterator<Item = ExecutorOutcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(outcomes.into_iter().collect()),
            })
        }
    }

    #[async_trait]
    impl ApplicationExecutor for ScriptedExecutor {
        async fn run(&self, _task: &TaskRecord) -> ExecutorOutcome {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ExecutorOutcome::FatalError("script exhausted".into()))
        }

        async fn session_valid(&self, _task: &TaskRecord) -> bool {
            true
        }

        async fn submit(&self, _task: &TaskRecord) -> Result<(), String> {
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        signal: Arc<InterruptSignal>,
        approvals: Arc<ApprovalService>,
        worker: Worker,
        run_id: RunId,
    }

    async fn fixture(executor: Arc<ScriptedExecutor>) -> Fixture {
        let clock = Arc::new(FixedClock::at(Utc::now()));
        fixture_with_clock(executor, clock).await
    }

    async fn fixture_with_clock(
        executor: Arc<ScriptedExecutor>,
        clock: Arc<FixedClock>,
    ) -> Fixture {
        let config = CoreConfig::default();
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let signal = Arc::new(InterruptSignal::new());
        let run = store
            .create_run(UserId::new(), serde_json::json!({}), None)
            .await
            .unwrap();

        let queue = Arc::new(QueueService::new(
            store.clone(),
            clock.clone(),
            config.clone(),
        ));
        let approvals = Arc::new(ApprovalService::new(
            store.clone(),
            clock.clone(),
            Arc::new(NoopNotifier),
            signal.clone(),
            config.clone(),
        ));
        let guard = SubmitGuard::new(store.clone(), clock.clone(), executor.clone());
        let worker = Worker::new(
            run.id,
            store.clone(),
            queue,
            approvals.clone(),
            executor,
            guard,
            signal.clone(),
            config,
        );
        Fixture {
            store,
            signal,
            approvals,
            worker,
            run_id: run.id,
        }
    }

    #[tokio::test]
    async fn full_approval_scenario_ends_submitted() {
        let executor = ScriptedExecutor::new([
            ExecutorOutcome::ReachedFinalReview(serde_json::json!({"q": "a"})),
            ExecutorOutcome::Success {
                apply_url: "https://example.com/apply".into(),
            },
        ]);
        let f = fixture(executor).await;
        let task = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();

        // First pass: dequeue, reach final review, park for approval.
        assert!(f.worker.tick().await);
        assert_eq!(
            f.store.get_task(task.id).await.unwrap().state,
            TaskState::PendingApproval
        );

        // User approves through the token; the worker gets interrupted.
        let approval = &f.store.pending_approvals().await.unwrap()[0];
        f.approvals.approve(&approval.token).await.unwrap();
        assert!(f.signal.is_raised());

        // Second pass: drain the approved task to completion.
        assert!(f.worker.tick().await);
        let task = f.store.get_task(task.id).await.unwrap();
        assert_eq!(task.state, TaskState::Submitted);
        assert!(f.store.job_applied_at(task.job_id).await.unwrap().is_some());
        assert!(!f.signal.is_raised());
    }

    #[tokio::test]
    async fn burst_of_approvals_coalesces_into_one_drain() {
        let executor = ScriptedExecutor::new([
            ExecutorOutcome::ReachedFinalReview(serde_json::json!({})),
            ExecutorOutcome::ReachedFinalReview(serde_json::json!({})),
            ExecutorOutcome::Success {
                apply_url: "https://a.example/apply".into(),
            },
            ExecutorOutcome::Success {
                apply_url: "https://b.example/apply".into(),
            },
        ]);
        let f = fixture(executor).await;
        let t1 = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();
        let t2 = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();

        assert!(f.worker.tick().await);
        assert!(f.worker.tick().await);

        // Both approvals land before the worker wakes.
        for approval in f.store.pending_approvals().await.unwrap() {
            f.approvals.approve(&approval.token).await.unwrap();
        }

        // One tick drains *all* approved tasks, not just the latest signal.
        assert!(f.worker.tick().await);
        assert_eq!(
            f.store.get_task(t1.id).await.unwrap().state,
            TaskState::Submitted
        );
        assert_eq!(
            f.store.get_task(t2.id).await.unwrap().state,
            TaskState::Submitted
        );
    }

    #[tokio::test]
    async fn transient_error_retries_once_then_fails() {
        let executor = ScriptedExecutor::new([
            ExecutorOutcome::TransientError("timeout".into()),
            ExecutorOutcome::TransientError("timeout".into()),
        ]);
        let f = fixture(executor).await;
        let task = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();

        assert!(f.worker.tick().await);
        assert_eq!(
            f.store.get_task(task.id).await.unwrap().state,
            TaskState::Queued
        );

        assert!(f.worker.tick().await);
        let task = f.store.get_task(task.id).await.unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.attempt_count, 2);
    }

    #[tokio::test]
    async fn needs_auth_parks_and_is_never_auto_retried() {
        let executor = ScriptedExecutor::new([ExecutorOutcome::NeedsAuth]);
        let f = fixture(executor).await;
        let task = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();

        assert!(f.worker.tick().await);
        assert_eq!(
            f.store.get_task(task.id).await.unwrap().state,
            TaskState::NeedsAuth
        );

        // Nothing eligible anymore; the parked task stays parked.
        assert!(!f.worker.tick().await);
        assert_eq!(
            f.store.get_task(task.id).await.unwrap().state,
            TaskState::NeedsAuth
        );
    }

    #[tokio::test]
    async fn fatal_error_fails_without_retry() {
        let executor = ScriptedExecutor::new([ExecutorOutcome::FatalError("captcha wall".into())]);
        let f = fixture(executor).await;
        let task = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();

        assert!(f.worker.tick().await);
        let task = f.store.get_task(task.id).await.unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.attempt_count, 1);
        assert_eq!(task.last_error_code.as_deref(), Some("FATAL_ERROR"));
    }

    #[tokio::test]
    async fn paused_task_requeues_with_checkpoint() {
        let executor = ScriptedExecutor::new([ExecutorOutcome::Paused {
            checkpoint: serde_json::json!({"page": 3}),
        }]);
        let f = fixture(executor).await;
        let task = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();

        assert!(f.worker.tick().await);
        let task = f.store.get_task(task.id).await.unwrap();
        assert_eq!(task.state, TaskState::Queued);
        assert_eq!(task.checkpoint, Some(serde_json::json!({"page": 3})));
    }

    #[tokio::test]
    async fn one_bad_task_does_not_stall_the_batch() {
        let executor = ScriptedExecutor::new([
            ExecutorOutcome::FatalError("broken posting".into()),
            ExecutorOutcome::Success {
                apply_url: "https://example.com/apply".into(),
            },
        ]);
        let f = fixture(executor).await;
        let bad = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();
        let good = f.store.enqueue_task(f.run_id, JobId::new()).await.unwrap();

        assert!(f.worker.tick().await);
        assert!(f.worker.tick().await);

        assert_eq!(
            f.store.get_task(bad.id).await.unwrap().state,
            TaskState::Failed
        );
        assert_eq!(
            f.store.get_task(good.id).await.unwrap().state,
            TaskState::Submitted
        );
    }

    #[tokio::test]
    async fn restarted_worker_drains_preexisting_approved_tasks() {
        let executor = ScriptedExecutor::new([ExecutorOutcome::Success {
            apply_url: "https://example.com/apply".into(),
        }]);
        let clock = Arc::new(SystemClock);
        let config = CoreConfig {
            idle_poll: std::time::Duration::from_millis(10),
            ..CoreConfig::default()
        };
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let run = store
            .create_run(UserId::new(), serde_json::json!({}), None)
            .await
            .unwrap();

        // An approval landed, then the process died before the drain: the
        // task is durably Approved and no in-memory flag survives.
        let task = store.enqueue_task(run.id, JobId::new()).await.unwrap();
        store.claim_next(run.id).await.unwrap().unwrap();
        store
            .transition(
                task.id,
                TaskState::PendingApproval,
                TransitionCtx::default(),
            )
            .await
            .unwrap();
        store
            .transition(task.id, TaskState::Approved, TransitionCtx::default())
            .await
            .unwrap();

        // Fresh signal and worker, as after a restart.
        let signal = Arc::new(InterruptSignal::new());
        let queue = Arc::new(QueueService::new(
            store.clone(),
            clock.clone(),
            config.clone(),
        ));
        let approvals = Arc::new(ApprovalService::new(
            store.clone(),
            clock.clone(),
            Arc::new(NoopNotifier),
            signal.clone(),
            config.clone(),
        ));
        let guard = SubmitGuard::new(store.clone(), clock.clone(), executor.clone());
        let handle = Worker::new(
            run.id,
            store.clone(),
            queue,
            approvals,
            executor,
            guard,
            signal,
            config,
        )
        .spawn();

        for _ in 0..100 {
            if store.get_task(task.id).await.unwrap().state == TaskState::Submitted {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        handle.shutdown_and_join().await;
        assert_eq!(
            store.get_task(task.id).await.unwrap().state,
            TaskState::Submitted
        );
    }

    #[tokio::test]
    async fn spawned_worker_shuts_down_gracefully() {
        let executor = ScriptedExecutor::new([ExecutorOutcome::Success {
            apply_url: "https://example.com/apply".into(),
        }]);
        // Real clock here: the spawned loop sleeps on its idle poll.
        let clock = Arc::new(SystemClock);
        let config = CoreConfig {
            idle_poll: std::time::Duration::from_millis(10),
            ..CoreConfig::default()
        };
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let signal = Arc::new(InterruptSignal::new());
        let run = store
            .create_run(UserId::new(), serde_json::json!({}), None)
            .await
            .unwrap();
        let queue = Arc::new(QueueService::new(
            store.clone(),
            clock.clone(),
            config.clone(),
        ));
        let approvals = Arc::new(ApprovalService::new(
            store.clone(),
            clock.clone(),
            Arc::new(NoopNotifier),
            signal.clone(),
            config.clone(),
        ));
        let guard = SubmitGuard::new(store.clone(), clock.clone(), executor.clone());
        let task = store.enqueue_task(run.id, JobId::new()).await.unwrap();

        let handle = Worker::new(
            run.id,
            store.clone(),
            queue,
            approvals,
            executor,
            guard,
            signal,
            config,
        )
        .spawn();

        // Wait for the task to finish, then stop the loop.
        for _ in 0..100 {
            if store.get_task(task.id).await.unwrap().state == TaskState::Submitted {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        handle.shutdown_and_join().await;
        assert_eq!(
            store.get_task(task.id).await.unwrap().state,
            TaskState::Submitted
        );
    }
}
