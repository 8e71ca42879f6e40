//! Notifier port: delivery of approval requests to the user.

use async_trait::async_trait;

use crate::domain::ApprovalRequest;

/// Delivers an approval request over its channel (email in v1).
///
/// Dispatch failure never rolls back the approval record; the lifecycle
/// service logs it and the approval stays approvable through other surfaces.
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    async fn notify(&self, approval: &ApprovalRequest) -> Result<(), String>;
}

/// No-op notifier for tests and the demo binary.
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl ApprovalNotifier for NoopNotifier {
    async fn notify(&self, _approval: &ApprovalRequest) -> Result<(), String> {
        Ok(())
    }
}
