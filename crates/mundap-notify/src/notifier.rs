use async_trait::async_trait;

use crate::NotifyResult;
use crate::job::NotificationJob;

/// Last hop of a notification. No push provider is wired in; deployments
/// that add one implement this trait.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, job: &NotificationJob) -> NotifyResult<()>;
}

/// Notifier that writes deliveries to `tracing`.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn deliver(&self, job: &NotificationJob) -> NotifyResult<()> {
        tracing::info!(
            job_id = %job.id,
            kind = %job.kind,
            user_id = %job.user_id,
            attempts = job.attempts,
            "notification: {}",
            job.title,
        );
        Ok(())
    }
}

/// Notifier that discards everything.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn deliver(&self, _job: &NotificationJob) -> NotifyResult<()> {
        Ok(())
    }
}
