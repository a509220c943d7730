use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use mundap_types::models::{PairStatus, Role};

use crate::error::DbResult;
use crate::models::{
    AnswerDetailRow, AnswerRow, HistoryRow, NewQuestion, PairRow, QuestionRow, ReactionRow, UserRow,
};

/// The database capability the service runs on. One implementation per
/// backend; the server picks one at startup and shares it as `Arc<dyn Store>`.
///
/// Paged queries return `(rows, total)` where `total` ignores `limit`/`offset`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name for health output.
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> DbResult<()>;

    // -- Users --

    async fn create_user(&self, user: &UserRow) -> DbResult<()>;

    async fn find_user(&self, id: Uuid) -> DbResult<Option<UserRow>>;

    async fn find_user_by_phone_lookup(&self, lookup: &str) -> DbResult<Option<UserRow>>;

    /// Writes name, phone columns, status and `updated_at`.
    async fn update_user(&self, user: &UserRow) -> DbResult<bool>;

    async fn count_users(&self) -> DbResult<i64>;

    // -- Pairs --

    async fn create_pair(&self, pair: &PairRow) -> DbResult<()>;

    async fn find_pair(&self, id: Uuid) -> DbResult<Option<PairRow>>;

    async fn find_pair_by_invitation(&self, token: &str) -> DbResult<Option<PairRow>>;

    async fn find_active_pair_for_user(&self, user_id: Uuid) -> DbResult<Option<PairRow>>;

    async fn find_pending_pair_for_user(&self, user_id: Uuid) -> DbResult<Option<PairRow>>;

    async fn list_pairs_for_user(&self, user_id: Uuid) -> DbResult<Vec<PairRow>>;

    /// Issues a new token on a still-pending pair.
    async fn refresh_invitation(
        &self,
        pair_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<bool>;

    /// Puts `user_id` into the `role` slot of a pending pair, marks it active
    /// and clears the token. Returns `false` if the pair was no longer
    /// pending or the slot was taken, so concurrent accepts cannot both win.
    async fn activate_pair(
        &self,
        pair_id: Uuid,
        user_id: Uuid,
        role: Role,
        now: DateTime<Utc>,
    ) -> DbResult<bool>;

    /// Creates `user` and activates `pair_id` with them in one transaction.
    /// Nothing is written when activation loses.
    async fn register_with_invitation(
        &self,
        user: &UserRow,
        pair_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<bool>;

    async fn deactivate_pair(&self, pair_id: Uuid, now: DateTime<Utc>) -> DbResult<bool>;

    async fn deactivate_pairs_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> DbResult<u64>;

    /// Active pairs with both members present.
    async fn list_active_pairs(&self) -> DbResult<Vec<PairRow>>;

    /// Deletes pending pairs whose invitation has lapsed.
    async fn delete_expired_invitations(&self, now: DateTime<Utc>) -> DbResult<u64>;

    async fn count_pairs_by_status(&self) -> DbResult<Vec<(PairStatus, i64)>>;

    // -- Questions --

    async fn count_active_questions(&self) -> DbResult<i64>;

    /// The active question at `offset` under `order_num, created_at, id`.
    async fn active_question_at(&self, offset: i64) -> DbResult<Option<QuestionRow>>;

    async fn find_question(&self, id: i64) -> DbResult<Option<QuestionRow>>;

    async fn questions_by_category(
        &self,
        category: &str,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<QuestionRow>, i64)>;

    /// Case-insensitive substring match over active question content.
    async fn search_questions(
        &self,
        term: &str,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<QuestionRow>, i64)>;

    /// Active questions per category.
    async fn question_categories(&self) -> DbResult<Vec<(String, i64)>>;

    /// `(total, active)`.
    async fn question_counts(&self) -> DbResult<(i64, i64)>;

    async fn create_question(&self, question: &NewQuestion, now: DateTime<Utc>) -> DbResult<QuestionRow>;

    async fn update_question(&self, question: &QuestionRow) -> DbResult<bool>;

    async fn deactivate_question(&self, id: i64, now: DateTime<Utc>) -> DbResult<bool>;

    // -- Answers --

    async fn create_answer(&self, answer: &AnswerRow) -> DbResult<()>;

    async fn find_answer(&self, id: Uuid) -> DbResult<Option<AnswerRow>>;

    async fn find_answer_for(
        &self,
        question_id: i64,
        user_id: Uuid,
        pair_id: Uuid,
    ) -> DbResult<Option<AnswerRow>>;

    /// The pair's answers to the given questions, oldest first.
    async fn answers_for_questions(
        &self,
        pair_id: Uuid,
        question_ids: &[i64],
    ) -> DbResult<Vec<AnswerDetailRow>>;

    /// The pair's answers, newest first.
    async fn answers_for_pair(
        &self,
        pair_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<AnswerDetailRow>, i64)>;

    /// Every answer of the pair, oldest first.
    async fn all_answers_for_pair(&self, pair_id: Uuid) -> DbResult<Vec<AnswerDetailRow>>;

    /// Distinct questions the pair answered, most recently answered first.
    async fn pair_history(
        &self,
        pair_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<HistoryRow>, i64)>;

    async fn update_answer(&self, id: Uuid, content: &str, now: DateTime<Utc>) -> DbResult<bool>;

    /// Also removes the answer's reactions.
    async fn delete_answer(&self, id: Uuid) -> DbResult<bool>;

    async fn answer_timestamps(&self, pair_id: Uuid, user_id: Uuid) -> DbResult<Vec<DateTime<Utc>>>;

    /// Questions answered by two distinct members of the pair.
    async fn count_both_answered(&self, pair_id: Uuid) -> DbResult<i64>;

    async fn count_answers_since(&self, pair_id: Uuid, since: DateTime<Utc>) -> DbResult<i64>;

    async fn count_answers(&self) -> DbResult<i64>;

    // -- Reactions --

    /// One reaction per (answer, user); a new emoji replaces the old one.
    async fn upsert_reaction(&self, reaction: &ReactionRow) -> DbResult<()>;

    async fn delete_reaction(&self, answer_id: Uuid, user_id: Uuid) -> DbResult<bool>;

    async fn reactions_for_answers(&self, answer_ids: &[Uuid]) -> DbResult<Vec<ReactionRow>>;

    /// Reactions other members left on `user_id`'s answers within the pair.
    async fn count_reactions_received(&self, pair_id: Uuid, user_id: Uuid) -> DbResult<i64>;

    // -- Revoked tokens --

    /// Records `jti` as revoked. Returns `false` when it already was, so a
    /// single-use token can be claimed atomically.
    async fn revoke_token(&self, jti: Uuid, expires_at: DateTime<Utc>) -> DbResult<bool>;

    async fn is_token_revoked(&self, jti: Uuid) -> DbResult<bool>;

    async fn purge_revoked_tokens(&self, now: DateTime<Utc>) -> DbResult<u64>;
}
