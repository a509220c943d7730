use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio::task::JoinHandle;
use tracing::debug;

use mundap_crypto::PhoneVault;
use mundap_db::Store;
use mundap_notify::NotificationJob;
use mundap_notify::NotificationQueue;

use crate::token::TokenIssuer;

pub type AppState = Arc<AppStateInner>;

/// Request-path knobs that do not belong to any one component.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Admin question routes are closed when unset.
    pub admin_api_key: Option<String>,
    pub utc_offset_hours: i32,
    pub auth_rate_limit_per_minute: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            admin_api_key: None,
            utc_offset_hours: 9,
            auth_rate_limit_per_minute: 30,
        }
    }
}

pub struct AppStateInner {
    pub store: Arc<dyn Store>,
    pub tokens: TokenIssuer,
    pub phones: PhoneVault,
    pub queue: Arc<dyn NotificationQueue>,
    pub settings: Settings,
    pub auth_limiter: DefaultKeyedRateLimiter<IpAddr>,
    pub started_at: Instant,
}

impl AppStateInner {
    pub fn new(
        store: Arc<dyn Store>,
        tokens: TokenIssuer,
        phones: PhoneVault,
        queue: Arc<dyn NotificationQueue>,
        settings: Settings,
    ) -> AppState {
        let per_minute = NonZeroU32::new(settings.auth_rate_limit_per_minute).unwrap_or(NonZeroU32::MIN);
        Arc::new(Self {
            store,
            tokens,
            phones,
            queue,
            auth_limiter: RateLimiter::keyed(Quota::per_minute(per_minute)),
            settings,
            started_at: Instant::now(),
        })
    }

    /// Drops limiter entries for clients whose quota has fully replenished.
    /// Returns how many clients are still tracked.
    pub fn prune_rate_limits(&self) -> usize {
        self.auth_limiter.retain_recent();
        self.auth_limiter.shrink_to_fit();
        self.auth_limiter.len()
    }

    /// Hands `job` to the queue without holding up the request.
    pub fn notify(&self, job: NotificationJob) {
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            let kind = job.kind;
            if let Err(e) = queue.enqueue(job).await {
                tracing::warn!("Failed to enqueue {} notification: {}", kind, e);
            }
        });
    }
}

/// Prunes the per-IP limiter every `every`, so one-off clients do not stay
/// in memory.
pub fn spawn_limiter_pruning(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let tracked = state.prune_rate_limits();
            debug!("Rate limiter: {} clients tracked after pruning", tracked);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as TtlDuration;
    use mundap_db::Database;
    use mundap_notify::{LogQueue, NullNotifier};

    fn app_state(per_minute: u32) -> AppState {
        AppStateInner::new(
            Arc::new(Database::open_in_memory().unwrap()),
            TokenIssuer::new("access", "refresh", TtlDuration::minutes(5), TtlDuration::days(1)),
            PhoneVault::new([3u8; 32]),
            Arc::new(LogQueue::new(Arc::new(NullNotifier))),
            Settings {
                auth_rate_limit_per_minute: per_minute,
                ..Settings::default()
            },
        )
    }

    #[test]
    fn pruning_drops_replenished_clients() {
        // one cell replenishes every millisecond
        let state = app_state(60_000);
        for i in 0..=255u8 {
            let _ = state.auth_limiter.check_key(&IpAddr::from([10, 0, 0, i]));
        }
        assert_eq!(state.auth_limiter.len(), 256);

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(state.prune_rate_limits(), 0);
    }

    #[test]
    fn pruning_keeps_throttled_clients() {
        let state = app_state(1);
        let ip = IpAddr::from([192, 168, 0, 7]);
        assert!(state.auth_limiter.check_key(&ip).is_ok());
        assert!(state.auth_limiter.check_key(&ip).is_err());

        assert_eq!(state.prune_rate_limits(), 1);
        assert!(state.auth_limiter.check_key(&ip).is_err());
    }
}
