use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{PairStatus, Role, TokenKind, UserStatus};

// -- JWT Claims --

/// Claims carried by both access and refresh tokens. `kind` keeps one from
/// being replayed as the other; `jti` is what logout revokes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub role: Role,
    pub kind: TokenKind,
    pub jti: Uuid,
    pub iat: usize,
    pub exp: usize,
}

// -- Envelope --

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            timestamp: Utc::now(),
        }
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: i64) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            (total + limit as i64 - 1) / limit as i64
        };
        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: (page as i64) < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Vec<T>,
    pub pagination: Pagination,
    pub timestamp: DateTime<Utc>,
}

impl<T> PaginatedResponse<T> {
    pub fn new(message: impl Into<String>, data: Vec<T>, pagination: Pagination) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            pagination,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error: ErrorDetail,
    pub timestamp: DateTime<Utc>,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub role: String,
    pub phone: String,
    pub invite_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub phone: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcceptInvitationRequest {
    pub invite_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    /// Masked for display, e.g. `010-****-5678`.
    pub phone: String,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerView {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairView {
    pub id: Uuid,
    pub status: PairStatus,
    pub parent_id: Option<Uuid>,
    pub child_id: Option<Uuid>,
    pub partner: Option<PartnerView>,
    pub invitation_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: UserView,
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub pair: Option<PairView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub user: UserView,
    pub pair: Option<PairView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvitationResponse {
    pub pair_id: Uuid,
    pub invite_code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvitationCheck {
    pub valid: bool,
    pub inviter_name: String,
    pub inviter_role: Role,
    /// Role the joining user must have.
    pub required_role: Role,
    pub expires_at: Option<DateTime<Utc>>,
}

// -- Questions --

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: i64,
    pub content: String,
    pub category: String,
    pub order_num: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionStats {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub categories: Vec<CategoryCount>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateQuestionRequest {
    pub content: String,
    pub category: String,
    pub order_num: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateQuestionRequest {
    pub content: Option<String>,
    pub category: Option<String>,
    pub order_num: Option<i64>,
    pub is_active: Option<bool>,
}

// -- Answers --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitAnswerRequest {
    pub question_id: i64,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateAnswerRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionView {
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerView {
    pub id: Uuid,
    pub question_id: i64,
    pub user_id: Uuid,
    pub author_name: String,
    pub author_role: Role,
    pub content: String,
    pub answered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reactions: Vec<ReactionView>,
}

/// A question together with what the caller's pair has said about it.
#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionAnswers {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub question: QuestionView,
    pub answers: Vec<AnswerView>,
    pub my_answer: Option<AnswerView>,
    pub partner_answer: Option<AnswerView>,
    pub both_answered: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerEntry {
    pub id: Uuid,
    pub question_id: i64,
    pub question_content: String,
    pub category: String,
    pub user_id: Uuid,
    pub author_name: String,
    pub author_role: Role,
    pub content: String,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub question: QuestionView,
    pub my_answer: Option<AnswerView>,
    pub partner_answer: Option<AnswerView>,
    pub both_answered: bool,
    pub last_answered_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerStats {
    pub total_answers: i64,
    pub my_answers: i64,
    pub partner_answers: i64,
    pub both_answered_questions: i64,
    /// Consecutive service days, ending today or yesterday, on which the caller answered.
    pub current_streak: u32,
    pub reactions_received: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_counts_partial_last_page() {
        let p = Pagination::new(2, 20, 41);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_next);
        assert!(p.has_prev);

        let last = Pagination::new(3, 20, 41);
        assert!(!last.has_next);
    }

    #[test]
    fn pagination_of_empty_result() {
        let p = Pagination::new(1, 20, 0);
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_next);
        assert!(!p.has_prev);
    }

    #[test]
    fn empty_envelope_omits_data() {
        let body = serde_json::to_value(ApiResponse::<()>::empty("no question today")).unwrap();
        assert_eq!(body["success"], true);
        assert!(body.get("data").is_none());
    }
}
