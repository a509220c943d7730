use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DailyQuestion,
    AnswerReminder,
    PartnerAnswered,
    ReactionReceived,
    WeeklySummary,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DailyQuestion => "daily_question",
            Self::AnswerReminder => "answer_reminder",
            Self::PartnerAnswered => "partner_answered",
            Self::ReactionReceived => "reaction_received",
            Self::WeeklySummary => "weekly_summary",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message for one user. Serialized as JSON onto the Redis list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: Uuid,
    pub kind: JobKind,
    pub user_id: Uuid,
    pub pair_id: Option<Uuid>,
    pub title: String,
    pub body: String,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl NotificationJob {
    pub fn new(
        kind: JobKind,
        user_id: Uuid,
        pair_id: Option<Uuid>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            user_id,
            pair_id,
            title: title.into(),
            body: body.into(),
            attempts: 0,
            created_at: Utc::now(),
        }
    }

    pub fn daily_question(user_id: Uuid, pair_id: Uuid, question: &str) -> Self {
        Self::new(
            JobKind::DailyQuestion,
            user_id,
            Some(pair_id),
            "오늘의 질문이 도착했어요",
            question,
        )
    }

    pub fn answer_reminder(user_id: Uuid, pair_id: Uuid, question: &str) -> Self {
        Self::new(
            JobKind::AnswerReminder,
            user_id,
            Some(pair_id),
            "아직 오늘의 질문에 답하지 않았어요",
            question,
        )
    }

    pub fn partner_answered(user_id: Uuid, pair_id: Uuid, partner_name: &str) -> Self {
        Self::new(
            JobKind::PartnerAnswered,
            user_id,
            Some(pair_id),
            format!("{partner_name}님이 답변을 남겼어요"),
            "지금 확인해 보세요",
        )
    }

    pub fn reaction_received(user_id: Uuid, pair_id: Uuid, reactor_name: &str, emoji: &str) -> Self {
        Self::new(
            JobKind::ReactionReceived,
            user_id,
            Some(pair_id),
            format!("{reactor_name}님이 {emoji} 반응을 남겼어요"),
            "내 답변에 새로운 반응이 있어요",
        )
    }

    pub fn weekly_summary(user_id: Uuid, pair_id: Uuid, answers: i64) -> Self {
        Self::new(
            JobKind::WeeklySummary,
            user_id,
            Some(pair_id),
            "이번 주 문답 요약",
            format!("이번 주에 {answers}개의 답변을 주고받았어요"),
        )
    }
}
