//! Demo wiring for autoapply-core.
//!
//! Runs one small batch against a simulated executor: one application sails
//! through, one hits a transient error and retries, one reaches final review
//! and waits for an approval that the "user" grants a moment later.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::{sleep, Duration};

use autoapply_core::domain::{ExecutorOutcome, JobId, TaskRecord, TaskState, UserId};
use autoapply_core::ports::clock::SystemClock;
use autoapply_core::ports::executor::ApplicationExecutor;
use autoapply_core::ports::notifier::NoopNotifier;
use autoapply_core::ports::store::TaskStore;
use autoapply_core::{
    spawn_maintenance, ApprovalService, CoreConfig, InterruptSignal, MemoryStore, QueueService,
    SubmitGuard, Worker,
};

/// Simulated browser bot: replays a script of outcomes, one per invocation.
struct SimulatedBot {
    script: Mutex<VecDeque<ExecutorOutcome>>,
}

impl SimulatedBot {
    fn new(outcomes: impl IntoIterator<Item = ExecutorOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into_iter().collect()),
        })
    }
}

#[async_trait]
impl ApplicationExecutor for SimulatedBot {
    async fn run(&self, task: &TaskRecord) -> ExecutorOutcome {
        // Pretend each page interaction takes a moment.
        sleep(Duration::from_millis(50)).await;
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ExecutorOutcome::FatalError("script exhausted".into()));
        println!("[bot] task {} -> {:?}", task.id, outcome);
        outcome
    }

    async fn session_valid(&self, _task: &TaskRecord) -> bool {
        true
    }

    async fn submit(&self, task: &TaskRecord) -> Result<(), String> {
        println!("[bot] pressing submit for task {}", task.id);
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = CoreConfig {
        idle_poll: Duration::from_millis(50),
        ..CoreConfig::default()
    };
    let clock = Arc::new(SystemClock);
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new(clock.clone()));
    let signal = Arc::new(InterruptSignal::new());

    let bot = SimulatedBot::new([
        // Task 1: straight through.
        ExecutorOutcome::Success {
            apply_url: "https://jobs.example.com/1/apply".into(),
        },
        // Task 2: flaky site, then fine.
        ExecutorOutcome::TransientError("page timeout".into()),
        // Task 3: no draft capability, needs approval.
        ExecutorOutcome::ReachedFinalReview(serde_json::json!({
            "questions": ["Why do you want this role?"],
            "answers": ["Because of the mission."],
        })),
        // Task 2 retry.
        ExecutorOutcome::Success {
            apply_url: "https://jobs.example.com/2/apply".into(),
        },
        // Task 3 after approval.
        ExecutorOutcome::Success {
            apply_url: "https://jobs.example.com/3/apply".into(),
        },
    ]);

    // Wire the services.
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
    let guard = SubmitGuard::new(store.clone(), clock.clone(), bot.clone());

    // One batch, three jobs.
    let run = store
        .create_run(
            UserId::new(),
            serde_json::json!({"daily_cap": 10}),
            Some(3),
        )
        .await
        .expect("no other run is active");
    for _ in 0..3 {
        store.enqueue_task(run.id, JobId::new()).await.unwrap();
    }

    let maintenance = spawn_maintenance(
        queue.clone(),
        approvals.clone(),
        Duration::from_secs(5),
    );
    let worker = Worker::new(
        run.id,
        store.clone(),
        queue.clone(),
        approvals.clone(),
        bot,
        guard,
        signal.clone(),
        config,
    )
    .spawn();

    // Play the user: wait for the approval email, then click approve.
    let user = {
        let store = store.clone();
        let approvals = approvals.clone();
        tokio::spawn(async move {
            loop {
                let pending = approvals_pending(&store).await;
                if let Some(token) = pending {
                    println!("[user] approving submission");
                    approvals.approve(&token).await.unwrap();
                    break;
                }
                sleep(Duration::from_millis(50)).await;
            }
        })
    };

    // Wait until every task is terminal, then report.
    loop {
        let tasks = store.list_tasks(run.id, None).await.unwrap();
        if tasks.iter().all(|t| t.state.is_terminal()) {
            println!("--- final states ---");
            for t in &tasks {
                println!(
                    "{}: {} (attempts={}, last_error={:?})",
                    t.id, t.state, t.attempt_count, t.last_error_code
                );
            }
            assert!(tasks.iter().all(|t| t.state == TaskState::Submitted));
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    user.await.unwrap();
    worker.shutdown_and_join().await;
    maintenance.shutdown_and_join().await;
}

async fn approvals_pending(store: &Arc<MemoryStore>) -> Option<String> {
    store
        .pending_approvals()
        .await
        .unwrap()
        .first()
        .map(|a| a.token.clone())
}
