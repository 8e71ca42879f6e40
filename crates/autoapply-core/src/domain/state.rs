//! Task, run, and approval states, plus the allowed-transition table.
//!
//! The transition table is data, not control flow: `can_transition_to` is the
//! single place that says which state changes exist. The store's `transition`
//! method consults it and nothing else in the crate writes `state`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of one application task.
///
/// Transitions:
/// - `Queued -> Running` (worker claims it)
/// - `Running -> NeedsAuth | NeedsUser | PendingApproval | Submitted | Failed | Expired | Queued`
///   (the `Running -> Queued` arc is stuck-task recovery and transient-error requeue)
/// - `NeedsAuth -> Queued`, `NeedsUser -> Queued` (user acted out-of-band)
/// - `PendingApproval -> Approved | Expired | Rejected`
/// - `Approved -> Running | Expired` (worker interrupt; or session lost)
/// - `Failed -> Queued` (manual resume)
///
/// `Submitted` and `Rejected` are terminal. `Expired` and `Failed` are
/// terminal unless explicitly resumed; `Expired` is not resumable at all, the
/// job must be attached to a run again as a fresh task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    Running,
    NeedsAuth,
    NeedsUser,
    PendingApproval,
    Approved,
    Submitted,
    Failed,
    Expired,
    Rejected,
}

impl TaskState {
    /// Allowed targets from this state.
    pub fn allowed_targets(self) -> &'static [TaskState] {
        use TaskState::*;
        match self {
            Queued => &[Running],
            Running => &[
                NeedsAuth,
                NeedsUser,
                PendingApproval,
                Submitted,
                Failed,
                Expired,
                Queued,
            ],
            NeedsAuth => &[Queued],
            NeedsUser => &[Queued],
            PendingApproval => &[Approved, Expired, Rejected],
            Approved => &[Running, Expired],
            Failed => &[Queued],
            Submitted | Expired | Rejected => &[],
        }
    }

    pub fn can_transition_to(self, target: TaskState) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// No further transitions exist from this state.
    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// Eligible for `claim_next`.
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskState::Queued)
    }

    /// Parked waiting for an out-of-band user action (never auto-retried).
    pub fn is_waiting_on_user(self) -> bool {
        matches!(self, TaskState::NeedsAuth | TaskState::NeedsUser)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Queued => "QUEUED",
            TaskState::Running => "RUNNING",
            TaskState::NeedsAuth => "NEEDS_AUTH",
            TaskState::NeedsUser => "NEEDS_USER",
            TaskState::PendingApproval => "PENDING_APPROVAL",
            TaskState::Approved => "APPROVED",
            TaskState::Submitted => "SUBMITTED",
            TaskState::Failed => "FAILED",
            TaskState::Expired => "EXPIRED",
            TaskState::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a run (batch). At most one run is `Running` at a time
/// system-wide; the store enforces that at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Stopped,
    Completed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Stopped => "stopped",
            RunStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Status of an approval request. `Pending` is the only live status; the
/// other three are resolutions and an approval is never mutated after one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Expired,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Expired => "expired",
            ApprovalStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}
