use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use tracing::{info, warn};

use crate::job::NotificationJob;
use crate::notifier::Notifier;
use crate::{NotifyError, NotifyResult};

pub const PENDING_KEY: &str = "mundap:notifications:pending";
pub const COMPLETED_KEY: &str = "mundap:notifications:completed";
pub const FAILED_KEY: &str = "mundap:notifications:failed";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Where producers put notification jobs.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Short backend name for health output.
    fn backend(&self) -> &'static str;

    async fn enqueue(&self, job: NotificationJob) -> NotifyResult<()>;

    async fn stats(&self) -> NotifyResult<QueueStats>;

    /// Resets the completed/failed counters.
    async fn reset_counters(&self) -> NotifyResult<()>;
}

/// Redis list queue: producers `LPUSH`, the worker `RPOP`s.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str) -> NotifyResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, client.get_connection_manager())
            .await
            .map_err(|_| NotifyError::Timeout)??;

        info!("Redis notification queue connected");
        Ok(Self { conn })
    }

    pub async fn pop(&self) -> NotifyResult<Option<NotificationJob>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.rpop(PENDING_KEY, None).await?;
        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    pub async fn mark_completed(&self) -> NotifyResult<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.incr(COMPLETED_KEY, 1).await?;
        Ok(())
    }

    pub async fn mark_failed(&self) -> NotifyResult<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.incr(FAILED_KEY, 1).await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationQueue for RedisQueue {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn enqueue(&self, job: NotificationJob) -> NotifyResult<()> {
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.conn.clone();
        let _: u64 = conn.lpush(PENDING_KEY, payload).await?;
        Ok(())
    }

    async fn stats(&self) -> NotifyResult<QueueStats> {
        let mut conn = self.conn.clone();
        let pending: u64 = conn.llen(PENDING_KEY).await?;
        let completed: Option<u64> = conn.get(COMPLETED_KEY).await?;
        let failed: Option<u64> = conn.get(FAILED_KEY).await?;
        Ok(QueueStats {
            pending,
            completed: completed.unwrap_or(0),
            failed: failed.unwrap_or(0),
        })
    }

    async fn reset_counters(&self) -> NotifyResult<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.del(&[COMPLETED_KEY, FAILED_KEY]).await?;
        Ok(())
    }
}

/// Fallback when Redis is not configured: delivers inline through the
/// notifier and keeps in-process counters.
pub struct LogQueue {
    notifier: Arc<dyn Notifier>,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl LogQueue {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl NotificationQueue for LogQueue {
    fn backend(&self) -> &'static str {
        "log"
    }

    async fn enqueue(&self, job: NotificationJob) -> NotifyResult<()> {
        match self.notifier.deliver(&job).await {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                warn!(job_id = %job.id, kind = %job.kind, "Notification delivery failed: {}", e);
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn stats(&self) -> NotifyResult<QueueStats> {
        Ok(QueueStats {
            pending: 0,
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        })
    }

    async fn reset_counters(&self) -> NotifyResult<()> {
        self.completed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        Ok(())
    }
}
