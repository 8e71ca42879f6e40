//! Executor port: the external browser-automation collaborator.

use async_trait::async_trait;

use crate::domain::{ExecutorOutcome, TaskRecord};

/// Drives one application attempt in the external session and reports back.
///
/// Design:
/// - `run` is the only long-blocking call in the system; it may take minutes.
///   It is infallible at the type level because every failure mode is an
///   `ExecutorOutcome` variant the worker knows how to interpret.
/// - The executor owns the single external session. The core only forces a
///   context switch through the approval-interruption protocol, and the
///   executor must leave the session resumable (via the task's checkpoint
///   blob) before yielding.
#[async_trait]
pub trait ApplicationExecutor: Send + Sync {
    /// Drive the task forward from its checkpoint (if any) until a yield
    /// point, and report what happened.
    async fn run(&self, task: &TaskRecord) -> ExecutorOutcome;

    /// Re-validate that the session that reached the review page is still
    /// usable. Called by the submit guard immediately before submitting.
    async fn session_valid(&self, task: &TaskRecord) -> bool;

    /// Press the final submit control. Side-effecting; the guard ensures this
    /// is called at most once per fingerprint.
    async fn submit(&self, task: &TaskRecord) -> Result<(), String>;
}
