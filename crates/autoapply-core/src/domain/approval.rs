//! Approval request: a time-boxed, single-use gate tied to one task.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::ids::{ApprovalId, TaskId};
use super::state::ApprovalStatus;

/// Length of the random approval token. 32 alphanumeric characters is ~190
/// bits, unguessable for a 20-minute window by a wide margin.
const TOKEN_LEN: usize = 32;

/// Delivery channel for the approval notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalChannel {
    Email,
}

/// One-time gate created when a task reaches a final-review checkpoint with
/// no save/draft capability. Resolved exactly once (approve, reject, or TTL
/// expiry) and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub task_id: TaskId,
    pub status: ApprovalStatus,
    pub channel: ApprovalChannel,

    /// Single-use credential. Consuming it twice fails closed.
    pub token: String,

    /// Snapshot of the presented form (questions/answers) at review time.
    /// Opaque to the core; the executor supplies it.
    pub form_snapshot: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(
        task_id: TaskId,
        form_snapshot: serde_json::Value,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApprovalId::new(),
            task_id,
            status: ApprovalStatus::Pending,
            channel: ApprovalChannel::Email,
            token: generate_token(),
            form_snapshot,
            created_at: now,
            expires_at: now + ttl,
            approved_at: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}
