//! Executor outcome: the callback contract from the external task executor.
//!
//! The executor (browser automation, outside this crate) reports exactly one
//! of these per invocation; the worker loop interprets it as a state
//! transition. This module only defines the shape.

use serde::{Deserialize, Serialize};

/// What the external executor observed while driving one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExecutorOutcome {
    /// The target site demands authentication the bot cannot perform.
    /// Task parks in `NeedsAuth` until the user signals completion.
    NeedsAuth,

    /// The form asks a question the profile cannot answer.
    NeedsUserInput,

    /// The flow reached a final review page with no save/draft capability.
    /// Carries a snapshot of the presented questions and answers; the core
    /// stores it opaquely on the approval request.
    ReachedFinalReview(serde_json::Value),

    /// Everything is filled in and the submit control is reachable. Carries
    /// the apply-target URL for fingerprinting; the core decides whether to
    /// press it (idempotency guard, session check).
    ReadyToSubmit { apply_url: String },

    /// Submission was confirmed by the executor as part of the flow.
    Success { apply_url: String },

    /// The executor paused cleanly at a checkpoint because the worker was
    /// interrupted for an approved task. Carries opaque resume metadata that
    /// the core stores on the task row and hands back on the next claim.
    Paused { checkpoint: serde_json::Value },

    /// Recoverable failure (timeout, flaky page). Retried once.
    TransientError(String),

    /// Unrecoverable failure. No retry.
    FatalError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_with_snake_case_tags() {
        let s = serde_json::to_string(&ExecutorOutcome::NeedsAuth).unwrap();
        assert!(s.contains("needs_auth"));

        let s =
            serde_json::to_string(&ExecutorOutcome::TransientError("timeout".into())).unwrap();
        let v: serde_json::Value = serde_json::from_str(&s).unwrap();
        assert_eq!(v["kind"], "transient_error");
        assert_eq!(v["detail"], "timeout");
    }
}
