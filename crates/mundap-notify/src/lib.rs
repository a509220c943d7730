//! Notification jobs and the machinery that moves them: a queue (Redis or
//! log-only), a delivery worker with retry/backoff, and the scheduler that
//! produces the periodic fan-outs.

pub mod job;
pub mod notifier;
pub mod queue;
pub mod scheduler;
pub mod worker;

use thiserror::Error;

pub use job::{JobKind, NotificationJob};
pub use notifier::{Notifier, NullNotifier, TracingNotifier};
pub use queue::{LogQueue, NotificationQueue, QueueStats, RedisQueue};
pub use scheduler::{ScheduleConfig, Scheduler};

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis connection timed out")]
    Timeout,

    #[error("job encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("store: {0}")]
    Store(#[from] mundap_db::DbError),

    #[error("delivery failed: {0}")]
    Delivery(String),
}
