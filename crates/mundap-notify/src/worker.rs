use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::NotifyResult;
use crate::job::NotificationJob;
use crate::notifier::Notifier;
use crate::queue::{NotificationQueue, RedisQueue};

/// Delivery attempts before a job is counted failed.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay before retry number `attempt` (1-based): 2, 4, 8 seconds.
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Retry(Duration),
    Failed,
}

/// Decides what happens to `job` after a delivery attempt, bumping its
/// attempt counter on failure.
pub fn settle(job: &mut NotificationJob, delivered: &NotifyResult<()>) -> Outcome {
    if delivered.is_ok() {
        return Outcome::Completed;
    }
    job.attempts += 1;
    if job.attempts >= MAX_ATTEMPTS {
        Outcome::Failed
    } else {
        Outcome::Retry(backoff(job.attempts))
    }
}

/// Drains the Redis queue forever, sleeping `idle` whenever it is empty.
pub async fn run_worker(queue: Arc<RedisQueue>, notifier: Arc<dyn Notifier>, idle: Duration) {
    loop {
        match queue.pop().await {
            Ok(Some(job)) => process(&queue, notifier.as_ref(), job).await,
            Ok(None) => tokio::time::sleep(idle).await,
            Err(e) => {
                warn!("Notification worker: pop failed: {}", e);
                tokio::time::sleep(idle).await;
            }
        }
    }
}

async fn process(queue: &Arc<RedisQueue>, notifier: &dyn Notifier, mut job: NotificationJob) {
    let delivered = notifier.deliver(&job).await;
    let outcome = settle(&mut job, &delivered);

    let bookkeeping = match outcome {
        Outcome::Completed => queue.mark_completed().await,
        Outcome::Failed => {
            warn!(
                job_id = %job.id,
                kind = %job.kind,
                "Notification dropped after {} attempts",
                job.attempts
            );
            queue.mark_failed().await
        }
        Outcome::Retry(delay) => {
            debug!(job_id = %job.id, "Retrying notification in {:?}", delay);
            let queue = Arc::clone(queue);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = queue.enqueue(job).await {
                    warn!("Notification worker: requeue failed: {}", e);
                }
            });
            Ok(())
        }
    };

    if let Err(e) = bookkeeping {
        warn!("Notification worker: counter update failed: {}", e);
    }
}
