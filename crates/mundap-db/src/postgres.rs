//! PostgreSQL backend. Same schema and semantics as the SQLite store, with
//! native UUID / TIMESTAMPTZ / BOOLEAN columns.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use tracing::info;
use uuid::Uuid;

use mundap_types::models::{PairStatus, Role};

use crate::error::{DbError, DbResult};
use crate::models::{
    AnswerDetailRow, AnswerRow, HistoryRow, NewQuestion, PairRow, QuestionRow, ReactionRow, UserRow,
};
use crate::queries::{like_pattern, slot_column};
use crate::seed::SEED_QUESTIONS;
use crate::store::Store;

const USER_COLUMNS: &str =
    "id, name, role, phone_ciphertext, phone_iv, phone_lookup, status, created_at, updated_at";

const PAIR_COLUMNS: &str = "id, parent_id, child_id, status, invitation_token, invitation_expires_at, created_at, updated_at";

const QUESTION_COLUMNS: &str = "id, content, category, order_num, is_active, created_at, updated_at";

const ANSWER_COLUMNS: &str = "id, question_id, user_id, pair_id, content, answered_at, updated_at";

const ANSWER_DETAIL_SELECT: &str = "SELECT a.id, a.question_id, a.user_id, a.pair_id, a.content, a.answered_at, a.updated_at,
            u.name AS author_name, u.role AS author_role, q.content AS question_content, q.category
     FROM answers a
     JOIN users u ON u.id = a.user_id
     JOIN questions q ON q.id = a.question_id";

const ROTATION_ORDER: &str = "ORDER BY order_num ASC, created_at ASC, id ASC";

const SCHEMA_V1: &str = "
    CREATE TABLE users (
        id                  UUID PRIMARY KEY,
        name                TEXT NOT NULL,
        role                TEXT NOT NULL CHECK (role IN ('parent', 'child')),
        phone_ciphertext    TEXT NOT NULL,
        phone_iv            TEXT NOT NULL,
        phone_lookup        TEXT NOT NULL UNIQUE,
        status              TEXT NOT NULL DEFAULT 'active'
                            CHECK (status IN ('active', 'inactive')),
        created_at          TIMESTAMPTZ NOT NULL,
        updated_at          TIMESTAMPTZ NOT NULL
    );

    CREATE TABLE pairs (
        id                      UUID PRIMARY KEY,
        parent_id               UUID REFERENCES users(id),
        child_id                UUID REFERENCES users(id),
        status                  TEXT NOT NULL DEFAULT 'pending'
                                CHECK (status IN ('pending', 'active', 'inactive')),
        invitation_token        TEXT UNIQUE,
        invitation_expires_at   TIMESTAMPTZ,
        created_at              TIMESTAMPTZ NOT NULL,
        updated_at              TIMESTAMPTZ NOT NULL
    );

    CREATE INDEX idx_pairs_parent ON pairs(parent_id, status);
    CREATE INDEX idx_pairs_child ON pairs(child_id, status);

    CREATE TABLE questions (
        id          BIGSERIAL PRIMARY KEY,
        content     TEXT NOT NULL,
        category    TEXT NOT NULL,
        order_num   BIGINT NOT NULL DEFAULT 0,
        is_active   BOOLEAN NOT NULL DEFAULT TRUE,
        created_at  TIMESTAMPTZ NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL
    );

    CREATE INDEX idx_questions_rotation ON questions(is_active, order_num, created_at);

    CREATE TABLE answers (
        id          UUID PRIMARY KEY,
        question_id BIGINT NOT NULL REFERENCES questions(id),
        user_id     UUID NOT NULL REFERENCES users(id),
        pair_id     UUID NOT NULL REFERENCES pairs(id),
        content     TEXT NOT NULL,
        answered_at TIMESTAMPTZ NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL,
        UNIQUE (question_id, user_id, pair_id)
    );

    CREATE INDEX idx_answers_pair ON answers(pair_id, answered_at);

    CREATE TABLE reactions (
        answer_id   UUID NOT NULL REFERENCES answers(id) ON DELETE CASCADE,
        user_id     UUID NOT NULL REFERENCES users(id),
        emoji       TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (answer_id, user_id)
    );

    CREATE TABLE revoked_tokens (
        jti         UUID PRIMARY KEY,
        expires_at  TIMESTAMPTZ NOT NULL
    );
";

/// PostgreSQL store over a pooled connection set.
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(database_url: &str) -> DbResult<Self> {
        info!("Connecting to PostgreSQL...");

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        let db = Self { pool };
        db.migrate().await?;

        info!("PostgreSQL connection pool established");
        Ok(db)
    }

    async fn migrate(&self) -> DbResult<()> {
        sqlx::raw_sql("CREATE TABLE IF NOT EXISTS schema_version (version BIGINT NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&self.pool)
                .await?;

        if version < 1 {
            info!("DB: running migration v1 (initial schema)");
            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(SCHEMA_V1).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO schema_version (version) VALUES (1)")
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        if version < 2 {
            info!("DB: running migration v2 (seed question catalog)");
            let now = Utc::now();
            let mut tx = self.pool.begin().await?;
            for (i, (category, content)) in SEED_QUESTIONS.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO questions (content, category, order_num, is_active, created_at, updated_at)
                     VALUES ($1, $2, $3, TRUE, $4, $4)",
                )
                .bind(*content)
                .bind(*category)
                .bind(i as i64 + 1)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            sqlx::query("INSERT INTO schema_version (version) VALUES (2)")
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        info!("Database migrations complete");
        Ok(())
    }

    async fn count(&self, sql: &str) -> DbResult<i64> {
        Ok(sqlx::query_scalar(sql).fetch_one(&self.pool).await?)
    }
}

#[async_trait]
impl Store for PgDatabase {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // -- Users --

    async fn create_user(&self, user: &UserRow) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_user(&mut conn, user).await
    }

    async fn find_user(&self, id: Uuid) -> DbResult<Option<UserRow>> {
        sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_user(&row))
            .transpose()
    }

    async fn find_user_by_phone_lookup(&self, lookup: &str) -> DbResult<Option<UserRow>> {
        sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE phone_lookup = $1"))
            .bind(lookup)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_user(&row))
            .transpose()
    }

    async fn update_user(&self, user: &UserRow) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE users
             SET name = $2, phone_ciphertext = $3, phone_iv = $4, phone_lookup = $5,
                 status = $6, updated_at = $7
             WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.phone_ciphertext)
        .bind(&user.phone_iv)
        .bind(&user.phone_lookup)
        .bind(user.status.as_str())
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_users(&self) -> DbResult<i64> {
        self.count("SELECT COUNT(*) FROM users").await
    }

    // -- Pairs --

    async fn create_pair(&self, pair: &PairRow) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO pairs (id, parent_id, child_id, status, invitation_token,
                                invitation_expires_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(pair.id)
        .bind(pair.parent_id)
        .bind(pair.child_id)
        .bind(pair.status.as_str())
        .bind(&pair.invitation_token)
        .bind(pair.invitation_expires_at)
        .bind(pair.created_at)
        .bind(pair.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_pair(&self, id: Uuid) -> DbResult<Option<PairRow>> {
        sqlx::query(&format!("SELECT {PAIR_COLUMNS} FROM pairs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_pair(&row))
            .transpose()
    }

    async fn find_pair_by_invitation(&self, token: &str) -> DbResult<Option<PairRow>> {
        sqlx::query(&format!("SELECT {PAIR_COLUMNS} FROM pairs WHERE invitation_token = $1"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_pair(&row))
            .transpose()
    }

    async fn find_active_pair_for_user(&self, user_id: Uuid) -> DbResult<Option<PairRow>> {
        sqlx::query(&format!(
            "SELECT {PAIR_COLUMNS} FROM pairs
             WHERE status = 'active' AND (parent_id = $1 OR child_id = $1)
             ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| map_pair(&row))
        .transpose()
    }

    async fn find_pending_pair_for_user(&self, user_id: Uuid) -> DbResult<Option<PairRow>> {
        sqlx::query(&format!(
            "SELECT {PAIR_COLUMNS} FROM pairs
             WHERE status = 'pending' AND (parent_id = $1 OR child_id = $1)
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| map_pair(&row))
        .transpose()
    }

    async fn list_pairs_for_user(&self, user_id: Uuid) -> DbResult<Vec<PairRow>> {
        sqlx::query(&format!(
            "SELECT {PAIR_COLUMNS} FROM pairs
             WHERE parent_id = $1 OR child_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(map_pair)
        .collect()
    }

    async fn refresh_invitation(
        &self,
        pair_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE pairs SET invitation_token = $2, invitation_expires_at = $3, updated_at = $4
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(pair_id)
        .bind(token)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn activate_pair(
        &self,
        pair_id: Uuid,
        user_id: Uuid,
        role: Role,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        activate(&mut conn, pair_id, user_id, role, now).await
    }

    async fn register_with_invitation(
        &self,
        user: &UserRow,
        pair_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;
        insert_user(&mut tx, user).await?;
        if !activate(&mut tx, pair_id, user.id, user.role, now).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn deactivate_pair(&self, pair_id: Uuid, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE pairs
             SET status = 'inactive', invitation_token = NULL, invitation_expires_at = NULL,
                 updated_at = $2
             WHERE id = $1 AND status != 'inactive'",
        )
        .bind(pair_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_pairs_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE pairs
             SET status = 'inactive', invitation_token = NULL, invitation_expires_at = NULL,
                 updated_at = $2
             WHERE (parent_id = $1 OR child_id = $1) AND status != 'inactive'",
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_active_pairs(&self) -> DbResult<Vec<PairRow>> {
        sqlx::query(&format!(
            "SELECT {PAIR_COLUMNS} FROM pairs
             WHERE status = 'active' AND parent_id IS NOT NULL AND child_id IS NOT NULL
             ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(map_pair)
        .collect()
    }

    async fn delete_expired_invitations(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM pairs
             WHERE status = 'pending'
               AND invitation_expires_at IS NOT NULL
               AND invitation_expires_at < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_pairs_by_status(&self) -> DbResult<Vec<(PairStatus, i64)>> {
        sqlx::query("SELECT status, COUNT(*) AS n FROM pairs GROUP BY status ORDER BY status")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| -> DbResult<(PairStatus, i64)> {
                Ok((parse_text(row, "status")?, row.try_get("n")?))
            })
            .collect()
    }

    // -- Questions --

    async fn count_active_questions(&self) -> DbResult<i64> {
        self.count("SELECT COUNT(*) FROM questions WHERE is_active").await
    }

    async fn active_question_at(&self, offset: i64) -> DbResult<Option<QuestionRow>> {
        if offset < 0 {
            return Ok(None);
        }
        sqlx::query(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions
             WHERE is_active {ROTATION_ORDER} LIMIT 1 OFFSET $1"
        ))
        .bind(offset)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| map_question(&row))
        .transpose()
    }

    async fn find_question(&self, id: i64) -> DbResult<Option<QuestionRow>> {
        sqlx::query(&format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_question(&row))
            .transpose()
    }

    async fn questions_by_category(
        &self,
        category: &str,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<QuestionRow>, i64)> {
        let rows = sqlx::query(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions
             WHERE is_active AND category = $1
             {ROTATION_ORDER} LIMIT $2 OFFSET $3"
        ))
        .bind(category)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(map_question)
        .collect::<DbResult<Vec<_>>>()?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM questions WHERE is_active AND category = $1")
                .bind(category)
                .fetch_one(&self.pool)
                .await?;
        Ok((rows, total))
    }

    async fn search_questions(
        &self,
        term: &str,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<QuestionRow>, i64)> {
        let pattern = like_pattern(term);
        let rows = sqlx::query(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions
             WHERE is_active AND content ILIKE $1
             {ROTATION_ORDER} LIMIT $2 OFFSET $3"
        ))
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(map_question)
        .collect::<DbResult<Vec<_>>>()?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM questions WHERE is_active AND content ILIKE $1")
                .bind(&pattern)
                .fetch_one(&self.pool)
                .await?;
        Ok((rows, total))
    }

    async fn question_categories(&self) -> DbResult<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*) FROM questions
             WHERE is_active GROUP BY category ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn question_counts(&self) -> DbResult<(i64, i64)> {
        let counts: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE is_active) FROM questions",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn create_question(&self, question: &NewQuestion, now: DateTime<Utc>) -> DbResult<QuestionRow> {
        let order_num = match question.order_num {
            Some(n) => n,
            None => {
                sqlx::query_scalar("SELECT COALESCE(MAX(order_num), 0) + 1 FROM questions")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO questions (content, category, order_num, is_active, created_at, updated_at)
             VALUES ($1, $2, $3, TRUE, $4, $4)
             RETURNING id",
        )
        .bind(&question.content)
        .bind(&question.category)
        .bind(order_num)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(QuestionRow {
            id,
            content: question.content.clone(),
            category: question.category.clone(),
            order_num,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update_question(&self, question: &QuestionRow) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE questions
             SET content = $2, category = $3, order_num = $4, is_active = $5, updated_at = $6
             WHERE id = $1",
        )
        .bind(question.id)
        .bind(&question.content)
        .bind(&question.category)
        .bind(question.order_num)
        .bind(question.is_active)
        .bind(question.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_question(&self, id: i64, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE questions SET is_active = FALSE, updated_at = $2 WHERE id = $1 AND is_active",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Answers --

    async fn create_answer(&self, answer: &AnswerRow) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO answers (id, question_id, user_id, pair_id, content, answered_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(answer.id)
        .bind(answer.question_id)
        .bind(answer.user_id)
        .bind(answer.pair_id)
        .bind(&answer.content)
        .bind(answer.answered_at)
        .bind(answer.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_answer(&self, id: Uuid) -> DbResult<Option<AnswerRow>> {
        sqlx::query(&format!("SELECT {ANSWER_COLUMNS} FROM answers WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_answer(&row))
            .transpose()
    }

    async fn find_answer_for(
        &self,
        question_id: i64,
        user_id: Uuid,
        pair_id: Uuid,
    ) -> DbResult<Option<AnswerRow>> {
        sqlx::query(&format!(
            "SELECT {ANSWER_COLUMNS} FROM answers
             WHERE question_id = $1 AND user_id = $2 AND pair_id = $3"
        ))
        .bind(question_id)
        .bind(user_id)
        .bind(pair_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| map_answer(&row))
        .transpose()
    }

    async fn answers_for_questions(
        &self,
        pair_id: Uuid,
        question_ids: &[i64],
    ) -> DbResult<Vec<AnswerDetailRow>> {
        if question_ids.is_empty() {
            return Ok(vec![]);
        }
        sqlx::query(&format!(
            "{ANSWER_DETAIL_SELECT}
             WHERE a.pair_id = $1 AND a.question_id = ANY($2)
             ORDER BY a.answered_at ASC"
        ))
        .bind(pair_id)
        .bind(question_ids)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(map_answer_detail)
        .collect()
    }

    async fn answers_for_pair(
        &self,
        pair_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<AnswerDetailRow>, i64)> {
        let rows = sqlx::query(&format!(
            "{ANSWER_DETAIL_SELECT}
             WHERE a.pair_id = $1
             ORDER BY a.answered_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(pair_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(map_answer_detail)
        .collect::<DbResult<Vec<_>>>()?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM answers WHERE pair_id = $1")
            .bind(pair_id)
            .fetch_one(&self.pool)
            .await?;
        Ok((rows, total))
    }

    async fn all_answers_for_pair(&self, pair_id: Uuid) -> DbResult<Vec<AnswerDetailRow>> {
        sqlx::query(&format!(
            "{ANSWER_DETAIL_SELECT}
             WHERE a.pair_id = $1
             ORDER BY a.answered_at ASC"
        ))
        .bind(pair_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(map_answer_detail)
        .collect()
    }

    async fn pair_history(
        &self,
        pair_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<HistoryRow>, i64)> {
        let rows: Vec<(i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT question_id, MAX(answered_at) AS last_answered_at
             FROM answers WHERE pair_id = $1
             GROUP BY question_id
             ORDER BY last_answered_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(pair_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT question_id) FROM answers WHERE pair_id = $1")
                .bind(pair_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = rows
            .into_iter()
            .map(|(question_id, last_answered_at)| HistoryRow {
                question_id,
                last_answered_at,
            })
            .collect();
        Ok((rows, total))
    }

    async fn update_answer(&self, id: Uuid, content: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query("UPDATE answers SET content = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(content)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_answer(&self, id: Uuid) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM answers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn answer_timestamps(&self, pair_id: Uuid, user_id: Uuid) -> DbResult<Vec<DateTime<Utc>>> {
        let rows = sqlx::query_scalar(
            "SELECT answered_at FROM answers
             WHERE pair_id = $1 AND user_id = $2
             ORDER BY answered_at DESC",
        )
        .bind(pair_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_both_answered(&self, pair_id: Uuid) -> DbResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM (
                 SELECT question_id FROM answers WHERE pair_id = $1
                 GROUP BY question_id HAVING COUNT(DISTINCT user_id) >= 2
             ) both_answered",
        )
        .bind(pair_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn count_answers_since(&self, pair_id: Uuid, since: DateTime<Utc>) -> DbResult<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM answers WHERE pair_id = $1 AND answered_at >= $2")
                .bind(pair_id)
                .bind(since)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn count_answers(&self) -> DbResult<i64> {
        self.count("SELECT COUNT(*) FROM answers").await
    }

    // -- Reactions --

    async fn upsert_reaction(&self, reaction: &ReactionRow) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO reactions (answer_id, user_id, emoji, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (answer_id, user_id)
             DO UPDATE SET emoji = EXCLUDED.emoji, created_at = EXCLUDED.created_at",
        )
        .bind(reaction.answer_id)
        .bind(reaction.user_id)
        .bind(&reaction.emoji)
        .bind(reaction.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_reaction(&self, answer_id: Uuid, user_id: Uuid) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM reactions WHERE answer_id = $1 AND user_id = $2")
            .bind(answer_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reactions_for_answers(&self, answer_ids: &[Uuid]) -> DbResult<Vec<ReactionRow>> {
        if answer_ids.is_empty() {
            return Ok(vec![]);
        }
        let rows: Vec<(Uuid, Uuid, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT answer_id, user_id, emoji, created_at FROM reactions
             WHERE answer_id = ANY($1) ORDER BY created_at ASC",
        )
        .bind(answer_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(answer_id, user_id, emoji, created_at)| ReactionRow {
                answer_id,
                user_id,
                emoji,
                created_at,
            })
            .collect())
    }

    async fn count_reactions_received(&self, pair_id: Uuid, user_id: Uuid) -> DbResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM reactions r
             JOIN answers a ON a.id = r.answer_id
             WHERE a.pair_id = $1 AND a.user_id = $2 AND r.user_id != $2",
        )
        .bind(pair_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?)
    }

    // -- Revoked tokens --

    async fn revoke_token(&self, jti: Uuid, expires_at: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            "INSERT INTO revoked_tokens (jti, expires_at) VALUES ($1, $2)
             ON CONFLICT (jti) DO NOTHING",
        )
        .bind(jti)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_token_revoked(&self, jti: Uuid) -> DbResult<bool> {
        Ok(
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE jti = $1)")
                .bind(jti)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn purge_revoked_tokens(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_user(conn: &mut PgConnection, user: &UserRow) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO users (id, name, role, phone_ciphertext, phone_iv, phone_lookup,
                            status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(user.id)
    .bind(&user.name)
    .bind(user.role.as_str())
    .bind(&user.phone_ciphertext)
    .bind(&user.phone_iv)
    .bind(&user.phone_lookup)
    .bind(user.status.as_str())
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn activate(
    conn: &mut PgConnection,
    pair_id: Uuid,
    user_id: Uuid,
    role: Role,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    let column = slot_column(role);
    let result = sqlx::query(&format!(
        "UPDATE pairs
         SET {column} = $2, status = 'active', invitation_token = NULL,
             invitation_expires_at = NULL, updated_at = $3
         WHERE id = $1 AND status = 'pending' AND {column} IS NULL
           AND invitation_expires_at > $3"
    ))
    .bind(pair_id)
    .bind(user_id)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

fn parse_text<T>(row: &PgRow, column: &str) -> DbResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e| DbError::Corrupt(format!("{column}: {e}")))
}

fn map_user(row: &PgRow) -> DbResult<UserRow> {
    Ok(UserRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        role: parse_text(row, "role")?,
        phone_ciphertext: row.try_get("phone_ciphertext")?,
        phone_iv: row.try_get("phone_iv")?,
        phone_lookup: row.try_get("phone_lookup")?,
        status: parse_text(row, "status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_pair(row: &PgRow) -> DbResult<PairRow> {
    Ok(PairRow {
        id: row.try_get("id")?,
        parent_id: row.try_get("parent_id")?,
        child_id: row.try_get("child_id")?,
        status: parse_text(row, "status")?,
        invitation_token: row.try_get("invitation_token")?,
        invitation_expires_at: row.try_get("invitation_expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_question(row: &PgRow) -> DbResult<QuestionRow> {
    Ok(QuestionRow {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        category: row.try_get("category")?,
        order_num: row.try_get("order_num")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_answer(row: &PgRow) -> DbResult<AnswerRow> {
    Ok(AnswerRow {
        id: row.try_get("id")?,
        question_id: row.try_get("question_id")?,
        user_id: row.try_get("user_id")?,
        pair_id: row.try_get("pair_id")?,
        content: row.try_get("content")?,
        answered_at: row.try_get("answered_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_answer_detail(row: &PgRow) -> DbResult<AnswerDetailRow> {
    Ok(AnswerDetailRow {
        answer: map_answer(row)?,
        author_name: row.try_get("author_name")?,
        author_role: parse_text(row, "author_role")?,
        question_content: row.try_get("question_content")?,
        category: row.try_get("category")?,
    })
}
