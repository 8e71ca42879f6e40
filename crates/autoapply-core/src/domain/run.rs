//! Run record: one batch of application tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{RunId, UserId};
use super::state::RunStatus;

/// One batch. Owns its tasks exclusively (deleting a run cascades).
///
/// `settings_snapshot` is the configuration effective when the run was
/// created, frozen as an opaque blob so later settings edits never change a
/// running batch's behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub user_id: UserId,
    pub status: RunStatus,
    pub settings_snapshot: serde_json::Value,
    pub batch_size: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(
        user_id: UserId,
        settings_snapshot: serde_json::Value,
        batch_size: Option<u32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RunId::new(),
            user_id,
            status: RunStatus::Running,
            settings_snapshot,
            batch_size,
            created_at: now,
            updated_at: now,
        }
    }

    /// A run that is not `Running` stops claiming new tasks; in-flight work
    /// finishes or fails naturally.
    pub fn is_claiming(&self) -> bool {
        self.status == RunStatus::Running
    }
}
