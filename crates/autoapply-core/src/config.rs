//! Core configuration. Everything that is policy rather than invariant lives
//! here so deployments can tune it without touching the services.

use chrono::Duration;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// How long an approval request stays approvable.
    pub approval_ttl: Duration,

    /// A task `Running` longer than this without a state change is presumed
    /// crashed and requeued by the recovery sweep.
    pub stuck_timeout: Duration,

    /// Attempt budget. 2 means one automatic retry after a transient failure;
    /// the next failure is permanent until a manual resume.
    pub max_attempts: u32,

    /// Priority given to manually resumed tasks.
    pub resume_priority: i32,

    /// Priority given to approved tasks (most time-sensitive).
    pub approved_priority: i32,

    /// Worker sleep between polls when the queue is empty and no interrupt
    /// is pending.
    pub idle_poll: std::time::Duration,

    /// Interval of the recovery loop (stuck-task sweep + approval expiry).
    pub sweep_interval: std::time::Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            approval_ttl: Duration::minutes(20),
            stuck_timeout: Duration::minutes(15),
            max_attempts: 2,
            resume_priority: crate::domain::PRIORITY_RESUMED,
            approved_priority: crate::domain::PRIORITY_APPROVED,
            idle_poll: std::time::Duration::from_millis(500),
            sweep_interval: std::time::Duration::from_secs(60),
        }
    }
}
