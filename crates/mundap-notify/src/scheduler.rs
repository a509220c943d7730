use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mundap_db::Store;
use mundap_db::rotation;

use crate::NotifyResult;
use crate::job::NotificationJob;
use crate::queue::NotificationQueue;

/// Service-local hours at which the periodic jobs fire.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub utc_offset_hours: i32,
    pub daily_question_hour: u32,
    pub reminder_hour: u32,
    pub weekly_summary_hour: u32,
    pub cleanup_hour: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: 9,
            daily_question_hour: 9,
            reminder_hour: 20,
            weekly_summary_hour: 19,
            cleanup_hour: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledJob {
    DailyQuestion,
    Reminder,
    WeeklySummary,
    Cleanup,
}

impl ScheduledJob {
    pub const ALL: [ScheduledJob; 4] = [
        Self::DailyQuestion,
        Self::Reminder,
        Self::WeeklySummary,
        Self::Cleanup,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::DailyQuestion => "daily_question",
            Self::Reminder => "answer_reminder",
            Self::WeeklySummary => "weekly_summary",
            Self::Cleanup => "cleanup",
        }
    }

    fn hour(self, config: &ScheduleConfig) -> u32 {
        match self {
            Self::DailyQuestion => config.daily_question_hour,
            Self::Reminder => config.reminder_hour,
            Self::WeeklySummary => config.weekly_summary_hour,
            Self::Cleanup => config.cleanup_hour,
        }
    }

    fn weekday(self) -> Option<Weekday> {
        match self {
            Self::WeeklySummary => Some(Weekday::Sun),
            _ => None,
        }
    }
}

/// The first instant strictly after `now` that falls on `hour:00` service
/// time (and on `weekday`, if given).
pub fn next_run(
    now: DateTime<Utc>,
    utc_offset_hours: i32,
    hour: u32,
    weekday: Option<Weekday>,
) -> DateTime<Utc> {
    let offset = Duration::hours(i64::from(utc_offset_hours));
    let local_now = (now + offset).naive_utc();
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);

    let mut candidate = local_now.date().and_time(at);
    while candidate <= local_now || weekday.is_some_and(|wd| candidate.weekday() != wd) {
        candidate += Duration::days(1);
    }
    candidate.and_utc() - offset
}

/// Successes and failures of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub invitations: u64,
    pub revoked_tokens: u64,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    queue: Arc<dyn NotificationQueue>,
    config: ScheduleConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn NotificationQueue>,
        config: ScheduleConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            queue,
            config,
        })
    }

    /// One task per job kind.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        ScheduledJob::ALL
            .into_iter()
            .map(|job| {
                let scheduler = Arc::clone(self);
                tokio::spawn(async move { scheduler.run_forever(job).await })
            })
            .collect()
    }

    async fn run_forever(&self, job: ScheduledJob) {
        loop {
            let now = Utc::now();
            let next = next_run(now, self.config.utc_offset_hours, job.hour(&self.config), job.weekday());
            info!("Scheduler: {} next runs at {}", job.name(), next);

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if let Err(e) = self.run(job).await {
                warn!("Scheduler: {} failed: {}", job.name(), e);
            }
        }
    }

    pub async fn run(&self, job: ScheduledJob) -> NotifyResult<()> {
        match job {
            ScheduledJob::DailyQuestion => {
                let fan_out = self.send_daily_questions().await?;
                info!("Scheduler: daily question sent={} failed={}", fan_out.sent, fan_out.failed);
            }
            ScheduledJob::Reminder => {
                let fan_out = self.send_reminders().await?;
                info!("Scheduler: reminders sent={} failed={}", fan_out.sent, fan_out.failed);
            }
            ScheduledJob::WeeklySummary => {
                let fan_out = self.send_weekly_summaries().await?;
                info!("Scheduler: weekly summaries sent={} failed={}", fan_out.sent, fan_out.failed);
            }
            ScheduledJob::Cleanup => {
                let report = self.cleanup().await?;
                if report.invitations > 0 || report.revoked_tokens > 0 {
                    info!(
                        "Cleanup: removed {} expired invitations, {} revoked tokens",
                        report.invitations, report.revoked_tokens
                    );
                }
            }
        }
        Ok(())
    }

    /// Today's question to both members of every active pair.
    pub async fn send_daily_questions(&self) -> NotifyResult<FanOut> {
        let today = rotation::service_today(self.config.utc_offset_hours);
        let Some(question) = rotation::question_for_day(self.store.as_ref(), today).await? else {
            warn!("Scheduler: no active questions, skipping daily notification");
            return Ok(FanOut::default());
        };

        let mut jobs = Vec::new();
        for pair in self.store.list_active_pairs().await? {
            for user in [pair.parent_id, pair.child_id].into_iter().flatten() {
                jobs.push(NotificationJob::daily_question(user, pair.id, &question.content));
            }
        }

        Ok(self.fan_out(jobs).await)
    }

    /// Members who have not answered today's question yet.
    pub async fn send_reminders(&self) -> NotifyResult<FanOut> {
        let today = rotation::service_today(self.config.utc_offset_hours);
        let Some(question) = rotation::question_for_day(self.store.as_ref(), today).await? else {
            return Ok(FanOut::default());
        };

        let mut jobs = Vec::new();
        for pair in self.store.list_active_pairs().await? {
            for user in [pair.parent_id, pair.child_id].into_iter().flatten() {
                if self.store.find_answer_for(question.id, user, pair.id).await?.is_none() {
                    jobs.push(NotificationJob::answer_reminder(user, pair.id, &question.content));
                }
            }
        }

        Ok(self.fan_out(jobs).await)
    }

    /// Answers exchanged in the last seven days, to both members.
    pub async fn send_weekly_summaries(&self) -> NotifyResult<FanOut> {
        let since = Utc::now() - Duration::days(7);

        let mut jobs = Vec::new();
        for pair in self.store.list_active_pairs().await? {
            let answers = self.store.count_answers_since(pair.id, since).await?;
            for user in [pair.parent_id, pair.child_id].into_iter().flatten() {
                jobs.push(NotificationJob::weekly_summary(user, pair.id, answers));
            }
        }

        Ok(self.fan_out(jobs).await)
    }

    pub async fn cleanup(&self) -> NotifyResult<CleanupReport> {
        let now = Utc::now();
        let invitations = self.store.delete_expired_invitations(now).await?;
        let revoked_tokens = self.store.purge_revoked_tokens(now).await?;

        let stats = self.queue.stats().await?;
        debug!(
            "Cleanup: queue counters completed={} failed={} reset",
            stats.completed, stats.failed
        );
        self.queue.reset_counters().await?;

        Ok(CleanupReport {
            invitations,
            revoked_tokens,
        })
    }

    async fn fan_out(&self, jobs: Vec<NotificationJob>) -> FanOut {
        let results = join_all(jobs.into_iter().map(|job| self.queue.enqueue(job))).await;

        let mut tally = FanOut::default();
        for result in results {
            match result {
                Ok(()) => tally.sent += 1,
                Err(e) => {
                    debug!("Scheduler: enqueue failed: {}", e);
                    tally.failed += 1;
                }
            }
        }
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::NullNotifier;
    use crate::queue::{LogQueue, QueueStats};
    use chrono::TimeZone;
    use mundap_db::Database;
    use mundap_db::models::{AnswerRow, PairRow, UserRow};
    use mundap_types::models::{Role, UserStatus};
    use uuid::Uuid;

    #[test]
    fn next_run_later_today() {
        // 00:00 UTC is 09:00 KST; next 20:00 KST is 11:00 UTC the same day
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        let next = next_run(now, 9, 20, None);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 3, 11, 0, 0).unwrap());
    }

    #[test]
    fn next_run_rolls_to_tomorrow() {
        // exactly at 09:00 KST: the 09:00 job is for tomorrow
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        let next = next_run(now, 9, 9, None);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 4, 0, 0, 0).unwrap());
    }

    #[test]
    fn weekly_run_lands_on_sunday() {
        // 2024-06-03 is a Monday
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        let next = next_run(now, 9, 19, Some(Weekday::Sun));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 9, 10, 0, 0).unwrap());
        assert_eq!((next + Duration::hours(9)).weekday(), Weekday::Sun);
    }

    fn user(name: &str, role: Role) -> UserRow {
        let now = Utc::now();
        UserRow {
            id: Uuid::new_v4(),
            name: name.into(),
            role,
            phone_ciphertext: "ct".into(),
            phone_iv: "iv".into(),
            phone_lookup: Uuid::new_v4().to_string(),
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    async fn paired_store() -> (Arc<Database>, UserRow, UserRow, PairRow) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let now = Utc::now();
        let parent = user("엄마", Role::Parent);
        let child = user("민지", Role::Child);
        db.create_user(&parent).await.unwrap();
        db.create_user(&child).await.unwrap();
        let pair = PairRow::invitation(parent.id, Role::Parent, "ABCD2345".into(), now + Duration::hours(1), now);
        db.create_pair(&pair).await.unwrap();
        assert!(db.activate_pair(pair.id, child.id, Role::Child, now).await.unwrap());
        (db, parent, child, pair)
    }

    #[tokio::test]
    async fn daily_question_reaches_both_members() {
        let (db, _, _, _) = paired_store().await;
        let queue = Arc::new(LogQueue::new(Arc::new(NullNotifier)));
        let scheduler = Scheduler::new(db, queue.clone(), ScheduleConfig::default());

        let fan_out = scheduler.send_daily_questions().await.unwrap();
        assert_eq!(fan_out, FanOut { sent: 2, failed: 0 });
        assert_eq!(queue.stats().await.unwrap().completed, 2);
    }

    #[tokio::test]
    async fn reminder_skips_members_who_answered() {
        let (db, parent, _, pair) = paired_store().await;
        let config = ScheduleConfig::default();
        let today = rotation::service_today(config.utc_offset_hours);
        let question = rotation::question_for_day(db.as_ref(), today).await.unwrap().unwrap();
        let now = Utc::now();
        db.create_answer(&AnswerRow {
            id: Uuid::new_v4(),
            question_id: question.id,
            user_id: parent.id,
            pair_id: pair.id,
            content: "좋았어요".into(),
            answered_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

        let queue = Arc::new(LogQueue::new(Arc::new(NullNotifier)));
        let scheduler = Scheduler::new(db, queue, config);
        assert_eq!(scheduler.send_reminders().await.unwrap().sent, 1);
    }

    #[tokio::test]
    async fn cleanup_removes_expired_invitations_and_resets_counters() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let inviter = user("아빠", Role::Parent);
        db.create_user(&inviter).await.unwrap();
        let past = Utc::now() - Duration::hours(48);
        let stale = PairRow::invitation(inviter.id, Role::Parent, "OLDC2345".into(), past + Duration::hours(24), past);
        db.create_pair(&stale).await.unwrap();

        let queue = Arc::new(LogQueue::new(Arc::new(NullNotifier)));
        queue
            .enqueue(NotificationJob::weekly_summary(inviter.id, stale.id, 0))
            .await
            .unwrap();

        let scheduler = Scheduler::new(db.clone(), queue.clone(), ScheduleConfig::default());
        let report = scheduler.cleanup().await.unwrap();
        assert_eq!(report.invitations, 1);
        assert!(db.find_pair(stale.id).await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
    }
}
