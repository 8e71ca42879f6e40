//! Task record: the queue unit, one job-application attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, RunId, TaskId};
use super::state::TaskState;

/// Default priority for tasks attached through the normal path.
pub const PRIORITY_NORMAL: i32 = 50;

/// Priority for manually resumed tasks: the user took action, serve them
/// ahead of the default backlog.
pub const PRIORITY_RESUMED: i32 = 100;

/// Priority for approved tasks: time-sensitive, the external session expires.
pub const PRIORITY_APPROVED: i32 = 200;

/// One job-application attempt.
///
/// Design:
/// - The store is the single source of truth; this struct is a snapshot
///   handed out to callers, never a live handle.
/// - `state` changes only through the store's `transition`, which also keeps
///   `last_state_change_at` monotonically non-decreasing and appends to the
///   transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub run_id: RunId,
    pub job_id: JobId,

    pub state: TaskState,

    /// Higher is served sooner; ties break FIFO by `queued_at`.
    pub priority: i32,

    /// Times this task entered `Running`.
    pub attempt_count: u32,

    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,

    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_state_change_at: DateTime<Utc>,

    /// Opaque resume checkpoint owned by the external executor. The core
    /// stores and forwards it, never inspects it.
    pub checkpoint: Option<serde_json::Value>,
}

impl TaskRecord {
    pub fn new(run_id: RunId, job_id: JobId, now: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            run_id,
            job_id,
            state: TaskState::Queued,
            priority: PRIORITY_NORMAL,
            attempt_count: 0,
            last_error_code: None,
            last_error_message: None,
            queued_at: now,
            started_at: None,
            last_state_change_at: now,
            checkpoint: None,
        }
    }
}

/// One immutable entry in a task's transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub task_id: TaskId,
    pub from: TaskState,
    pub to: TaskState,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}
