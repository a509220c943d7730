use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use mundap_types::models::{PairStatus, Role};

use crate::Database;
use crate::error::DbResult;
use crate::models::{
    AnswerDetailRow, AnswerRow, HistoryRow, NewQuestion, PairRow, QuestionRow, ReactionRow, UserRow,
};
use crate::store::Store;

const USER_COLUMNS: &str =
    "id, name, role, phone_ciphertext, phone_iv, phone_lookup, status, created_at, updated_at";

const PAIR_COLUMNS: &str = "id, parent_id, child_id, status, invitation_token, invitation_expires_at, created_at, updated_at";

const QUESTION_COLUMNS: &str = "id, content, category, order_num, is_active, created_at, updated_at";

const ANSWER_COLUMNS: &str = "id, question_id, user_id, pair_id, content, answered_at, updated_at";

const ANSWER_DETAIL_SELECT: &str = "SELECT a.id, a.question_id, a.user_id, a.pair_id, a.content, a.answered_at, a.updated_at,
            u.name, u.role, q.content, q.category
     FROM answers a
     JOIN users u ON u.id = a.user_id
     JOIN questions q ON q.id = a.question_id";

const ROTATION_ORDER: &str = "ORDER BY order_num ASC, created_at ASC, id ASC";

#[async_trait]
impl Store for Database {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> DbResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
            Ok(())
        })
    }

    // -- Users --

    async fn create_user(&self, user: &UserRow) -> DbResult<()> {
        self.with_conn(|conn| insert_user(conn, user))
    }

    async fn find_user(&self, id: Uuid) -> DbResult<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    [id.to_string()],
                    map_user,
                )
                .optional()?;
            Ok(row)
        })
    }

    async fn find_user_by_phone_lookup(&self, lookup: &str) -> DbResult<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE phone_lookup = ?1"),
                    [lookup],
                    map_user,
                )
                .optional()?;
            Ok(row)
        })
    }

    async fn update_user(&self, user: &UserRow) -> DbResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users
                 SET name = ?2, phone_ciphertext = ?3, phone_iv = ?4, phone_lookup = ?5,
                     status = ?6, updated_at = ?7
                 WHERE id = ?1",
                rusqlite::params![
                    user.id.to_string(),
                    user.name,
                    user.phone_ciphertext,
                    user.phone_iv,
                    user.phone_lookup,
                    user.status.as_str(),
                    user.updated_at,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    async fn count_users(&self) -> DbResult<i64> {
        self.with_conn(|conn| count(conn, "SELECT COUNT(*) FROM users", &[]))
    }

    // -- Pairs --

    async fn create_pair(&self, pair: &PairRow) -> DbResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pairs (id, parent_id, child_id, status, invitation_token,
                                    invitation_expires_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    pair.id.to_string(),
                    pair.parent_id.map(|id| id.to_string()),
                    pair.child_id.map(|id| id.to_string()),
                    pair.status.as_str(),
                    pair.invitation_token,
                    pair.invitation_expires_at,
                    pair.created_at,
                    pair.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    async fn find_pair(&self, id: Uuid) -> DbResult<Option<PairRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {PAIR_COLUMNS} FROM pairs WHERE id = ?1"),
                    [id.to_string()],
                    map_pair,
                )
                .optional()?;
            Ok(row)
        })
    }

    async fn find_pair_by_invitation(&self, token: &str) -> DbResult<Option<PairRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {PAIR_COLUMNS} FROM pairs WHERE invitation_token = ?1"),
                    [token],
                    map_pair,
                )
                .optional()?;
            Ok(row)
        })
    }

    async fn find_active_pair_for_user(&self, user_id: Uuid) -> DbResult<Option<PairRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {PAIR_COLUMNS} FROM pairs
                         WHERE status = 'active' AND (parent_id = ?1 OR child_id = ?1)
                         ORDER BY updated_at DESC LIMIT 1"
                    ),
                    [user_id.to_string()],
                    map_pair,
                )
                .optional()?;
            Ok(row)
        })
    }

    async fn find_pending_pair_for_user(&self, user_id: Uuid) -> DbResult<Option<PairRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {PAIR_COLUMNS} FROM pairs
                         WHERE status = 'pending' AND (parent_id = ?1 OR child_id = ?1)
                         ORDER BY created_at DESC LIMIT 1"
                    ),
                    [user_id.to_string()],
                    map_pair,
                )
                .optional()?;
            Ok(row)
        })
    }

    async fn list_pairs_for_user(&self, user_id: Uuid) -> DbResult<Vec<PairRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PAIR_COLUMNS} FROM pairs
                 WHERE parent_id = ?1 OR child_id = ?1
                 ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map([user_id.to_string()], map_pair)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    async fn refresh_invitation(
        &self,
        pair_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE pairs SET invitation_token = ?2, invitation_expires_at = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'pending'",
                rusqlite::params![pair_id.to_string(), token, expires_at, now],
            )?;
            Ok(changed > 0)
        })
    }

    async fn activate_pair(
        &self,
        pair_id: Uuid,
        user_id: Uuid,
        role: Role,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.with_conn(|conn| activate(conn, pair_id, user_id, role, now))
    }

    async fn register_with_invitation(
        &self,
        user: &UserRow,
        pair_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            insert_user(&tx, user)?;
            if !activate(&tx, pair_id, user.id, user.role, now)? {
                // dropping the transaction rolls the user insert back
                return Ok(false);
            }
            tx.commit()?;
            Ok(true)
        })
    }

    async fn deactivate_pair(&self, pair_id: Uuid, now: DateTime<Utc>) -> DbResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE pairs
                 SET status = 'inactive', invitation_token = NULL, invitation_expires_at = NULL,
                     updated_at = ?2
                 WHERE id = ?1 AND status != 'inactive'",
                rusqlite::params![pair_id.to_string(), now],
            )?;
            Ok(changed > 0)
        })
    }

    async fn deactivate_pairs_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> DbResult<u64> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE pairs
                 SET status = 'inactive', invitation_token = NULL, invitation_expires_at = NULL,
                     updated_at = ?2
                 WHERE (parent_id = ?1 OR child_id = ?1) AND status != 'inactive'",
                rusqlite::params![user_id.to_string(), now],
            )?;
            Ok(changed as u64)
        })
    }

    async fn list_active_pairs(&self) -> DbResult<Vec<PairRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PAIR_COLUMNS} FROM pairs
                 WHERE status = 'active' AND parent_id IS NOT NULL AND child_id IS NOT NULL
                 ORDER BY created_at ASC"
            ))?;
            let rows = stmt
                .query_map([], map_pair)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    async fn delete_expired_invitations(&self, now: DateTime<Utc>) -> DbResult<u64> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM pairs
                 WHERE status = 'pending'
                   AND invitation_expires_at IS NOT NULL
                   AND invitation_expires_at < ?1",
                [now],
            )?;
            Ok(deleted as u64)
        })
    }

    async fn count_pairs_by_status(&self) -> DbResult<Vec<(PairStatus, i64)>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM pairs GROUP BY status ORDER BY status")?;
            let rows = stmt
                .query_map([], |row| Ok((parse_col::<PairStatus>(row, 0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Questions --

    async fn count_active_questions(&self) -> DbResult<i64> {
        self.with_conn(|conn| count(conn, "SELECT COUNT(*) FROM questions WHERE is_active = 1", &[]))
    }

    async fn active_question_at(&self, offset: i64) -> DbResult<Option<QuestionRow>> {
        if offset < 0 {
            return Ok(None);
        }
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {QUESTION_COLUMNS} FROM questions
                         WHERE is_active = 1 {ROTATION_ORDER} LIMIT 1 OFFSET ?1"
                    ),
                    [offset],
                    map_question,
                )
                .optional()?;
            Ok(row)
        })
    }

    async fn find_question(&self, id: i64) -> DbResult<Option<QuestionRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ?1"),
                    [id],
                    map_question,
                )
                .optional()?;
            Ok(row)
        })
    }

    async fn questions_by_category(
        &self,
        category: &str,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<QuestionRow>, i64)> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {QUESTION_COLUMNS} FROM questions
                 WHERE is_active = 1 AND category = ?1
                 {ROTATION_ORDER} LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![category, limit, offset], map_question)?
                .collect::<Result<Vec<_>, _>>()?;
            let total = count(
                conn,
                "SELECT COUNT(*) FROM questions WHERE is_active = 1 AND category = ?1",
                &[&category],
            )?;
            Ok((rows, total))
        })
    }

    async fn search_questions(
        &self,
        term: &str,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<QuestionRow>, i64)> {
        let pattern = like_pattern(term);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {QUESTION_COLUMNS} FROM questions
                 WHERE is_active = 1 AND content LIKE ?1 ESCAPE '\\'
                 {ROTATION_ORDER} LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![pattern, limit, offset], map_question)?
                .collect::<Result<Vec<_>, _>>()?;
            let total = count(
                conn,
                "SELECT COUNT(*) FROM questions WHERE is_active = 1 AND content LIKE ?1 ESCAPE '\\'",
                &[&pattern],
            )?;
            Ok((rows, total))
        })
    }

    async fn question_categories(&self) -> DbResult<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT category, COUNT(*) FROM questions
                 WHERE is_active = 1 GROUP BY category ORDER BY category",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    async fn question_counts(&self) -> DbResult<(i64, i64)> {
        self.with_conn(|conn| {
            let counts = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM questions",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(counts)
        })
    }

    async fn create_question(&self, question: &NewQuestion, now: DateTime<Utc>) -> DbResult<QuestionRow> {
        self.with_conn(|conn| {
            let order_num = match question.order_num {
                Some(n) => n,
                None => conn.query_row(
                    "SELECT COALESCE(MAX(order_num), 0) + 1 FROM questions",
                    [],
                    |r| r.get(0),
                )?,
            };
            conn.execute(
                "INSERT INTO questions (content, category, order_num, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)",
                rusqlite::params![question.content, question.category, order_num, now],
            )?;
            Ok(QuestionRow {
                id: conn.last_insert_rowid(),
                content: question.content.clone(),
                category: question.category.clone(),
                order_num,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
        })
    }

    async fn update_question(&self, question: &QuestionRow) -> DbResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE questions
                 SET content = ?2, category = ?3, order_num = ?4, is_active = ?5, updated_at = ?6
                 WHERE id = ?1",
                rusqlite::params![
                    question.id,
                    question.content,
                    question.category,
                    question.order_num,
                    question.is_active,
                    question.updated_at,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    async fn deactivate_question(&self, id: i64, now: DateTime<Utc>) -> DbResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE questions SET is_active = 0, updated_at = ?2 WHERE id = ?1 AND is_active = 1",
                rusqlite::params![id, now],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Answers --

    async fn create_answer(&self, answer: &AnswerRow) -> DbResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO answers (id, question_id, user_id, pair_id, content, answered_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    answer.id.to_string(),
                    answer.question_id,
                    answer.user_id.to_string(),
                    answer.pair_id.to_string(),
                    answer.content,
                    answer.answered_at,
                    answer.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    async fn find_answer(&self, id: Uuid) -> DbResult<Option<AnswerRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {ANSWER_COLUMNS} FROM answers WHERE id = ?1"),
                    [id.to_string()],
                    |row| map_answer(row, 0),
                )
                .optional()?;
            Ok(row)
        })
    }

    async fn find_answer_for(
        &self,
        question_id: i64,
        user_id: Uuid,
        pair_id: Uuid,
    ) -> DbResult<Option<AnswerRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {ANSWER_COLUMNS} FROM answers
                         WHERE question_id = ?1 AND user_id = ?2 AND pair_id = ?3"
                    ),
                    rusqlite::params![question_id, user_id.to_string(), pair_id.to_string()],
                    |row| map_answer(row, 0),
                )
                .optional()?;
            Ok(row)
        })
    }

    async fn answers_for_questions(
        &self,
        pair_id: Uuid,
        question_ids: &[i64],
    ) -> DbResult<Vec<AnswerDetailRow>> {
        if question_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (2..=question_ids.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "{ANSWER_DETAIL_SELECT}
                 WHERE a.pair_id = ?1 AND a.question_id IN ({})
                 ORDER BY a.answered_at ASC",
                placeholders.join(", ")
            );

            let pair = pair_id.to_string();
            let mut params: Vec<&dyn ToSql> = vec![&pair];
            params.extend(question_ids.iter().map(|id| id as &dyn ToSql));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), map_answer_detail)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    async fn answers_for_pair(
        &self,
        pair_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<AnswerDetailRow>, i64)> {
        self.with_conn(|conn| {
            let pair = pair_id.to_string();
            let mut stmt = conn.prepare(&format!(
                "{ANSWER_DETAIL_SELECT}
                 WHERE a.pair_id = ?1
                 ORDER BY a.answered_at DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![pair, limit, offset], map_answer_detail)?
                .collect::<Result<Vec<_>, _>>()?;
            let total = count(conn, "SELECT COUNT(*) FROM answers WHERE pair_id = ?1", &[&pair])?;
            Ok((rows, total))
        })
    }

    async fn all_answers_for_pair(&self, pair_id: Uuid) -> DbResult<Vec<AnswerDetailRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{ANSWER_DETAIL_SELECT}
                 WHERE a.pair_id = ?1
                 ORDER BY a.answered_at ASC"
            ))?;
            let rows = stmt
                .query_map([pair_id.to_string()], map_answer_detail)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    async fn pair_history(
        &self,
        pair_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> DbResult<(Vec<HistoryRow>, i64)> {
        self.with_conn(|conn| {
            let pair = pair_id.to_string();
            let mut stmt = conn.prepare(
                "SELECT question_id, MAX(answered_at) AS last_answered_at
                 FROM answers WHERE pair_id = ?1
                 GROUP BY question_id
                 ORDER BY last_answered_at DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![pair, limit, offset], |row| {
                    Ok(HistoryRow {
                        question_id: row.get(0)?,
                        last_answered_at: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            let total = count(
                conn,
                "SELECT COUNT(DISTINCT question_id) FROM answers WHERE pair_id = ?1",
                &[&pair],
            )?;
            Ok((rows, total))
        })
    }

    async fn update_answer(&self, id: Uuid, content: &str, now: DateTime<Utc>) -> DbResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE answers SET content = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id.to_string(), content, now],
            )?;
            Ok(changed > 0)
        })
    }

    async fn delete_answer(&self, id: Uuid) -> DbResult<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM answers WHERE id = ?1", [id.to_string()])?;
            Ok(deleted > 0)
        })
    }

    async fn answer_timestamps(&self, pair_id: Uuid, user_id: Uuid) -> DbResult<Vec<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT answered_at FROM answers
                 WHERE pair_id = ?1 AND user_id = ?2
                 ORDER BY answered_at DESC",
            )?;
            let rows = stmt
                .query_map([pair_id.to_string(), user_id.to_string()], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    async fn count_both_answered(&self, pair_id: Uuid) -> DbResult<i64> {
        self.with_conn(|conn| {
            count(
                conn,
                "SELECT COUNT(*) FROM (
                     SELECT question_id FROM answers WHERE pair_id = ?1
                     GROUP BY question_id HAVING COUNT(DISTINCT user_id) >= 2
                 )",
                &[&pair_id.to_string()],
            )
        })
    }

    async fn count_answers_since(&self, pair_id: Uuid, since: DateTime<Utc>) -> DbResult<i64> {
        self.with_conn(|conn| {
            count(
                conn,
                "SELECT COUNT(*) FROM answers WHERE pair_id = ?1 AND answered_at >= ?2",
                &[&pair_id.to_string(), &since],
            )
        })
    }

    async fn count_answers(&self) -> DbResult<i64> {
        self.with_conn(|conn| count(conn, "SELECT COUNT(*) FROM answers", &[]))
    }

    // -- Reactions --

    async fn upsert_reaction(&self, reaction: &ReactionRow) -> DbResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reactions (answer_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(answer_id, user_id)
                 DO UPDATE SET emoji = excluded.emoji, created_at = excluded.created_at",
                rusqlite::params![
                    reaction.answer_id.to_string(),
                    reaction.user_id.to_string(),
                    reaction.emoji,
                    reaction.created_at,
                ],
            )?;
            Ok(())
        })
    }

    async fn delete_reaction(&self, answer_id: Uuid, user_id: Uuid) -> DbResult<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM reactions WHERE answer_id = ?1 AND user_id = ?2",
                [answer_id.to_string(), user_id.to_string()],
            )?;
            Ok(deleted > 0)
        })
    }

    /// Batch-fetch reactions for a set of answer IDs.
    async fn reactions_for_answers(&self, answer_ids: &[Uuid]) -> DbResult<Vec<ReactionRow>> {
        if answer_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=answer_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT answer_id, user_id, emoji, created_at FROM reactions
                 WHERE answer_id IN ({}) ORDER BY created_at ASC",
                placeholders.join(", ")
            );

            let ids: Vec<String> = answer_ids.iter().map(Uuid::to_string).collect();
            let params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        answer_id: parse_col(row, 0)?,
                        user_id: parse_col(row, 1)?,
                        emoji: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    async fn count_reactions_received(&self, pair_id: Uuid, user_id: Uuid) -> DbResult<i64> {
        self.with_conn(|conn| {
            let user = user_id.to_string();
            count(
                conn,
                "SELECT COUNT(*) FROM reactions r
                 JOIN answers a ON a.id = r.answer_id
                 WHERE a.pair_id = ?1 AND a.user_id = ?2 AND r.user_id != ?2",
                &[&pair_id.to_string(), &user],
            )
        })
    }

    // -- Revoked tokens --

    async fn revoke_token(&self, jti: Uuid, expires_at: DateTime<Utc>) -> DbResult<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO revoked_tokens (jti, expires_at) VALUES (?1, ?2)
                 ON CONFLICT(jti) DO NOTHING",
                rusqlite::params![jti.to_string(), expires_at],
            )?;
            Ok(inserted == 1)
        })
    }

    async fn is_token_revoked(&self, jti: Uuid) -> DbResult<bool> {
        self.with_conn(|conn| {
            let revoked = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE jti = ?1)",
                [jti.to_string()],
                |row| row.get(0),
            )?;
            Ok(revoked)
        })
    }

    async fn purge_revoked_tokens(&self, now: DateTime<Utc>) -> DbResult<u64> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM revoked_tokens WHERE expires_at < ?1", [now])?;
            Ok(deleted as u64)
        })
    }
}

fn insert_user(conn: &Connection, user: &UserRow) -> DbResult<()> {
    conn.execute(
        "INSERT INTO users (id, name, role, phone_ciphertext, phone_iv, phone_lookup,
                            status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            user.id.to_string(),
            user.name,
            user.role.as_str(),
            user.phone_ciphertext,
            user.phone_iv,
            user.phone_lookup,
            user.status.as_str(),
            user.created_at,
            user.updated_at,
        ],
    )?;
    Ok(())
}

fn activate(
    conn: &Connection,
    pair_id: Uuid,
    user_id: Uuid,
    role: Role,
    now: DateTime<Utc>,
) -> DbResult<bool> {
    let column = slot_column(role);
    let changed = conn.execute(
        &format!(
            "UPDATE pairs
             SET {column} = ?2, status = 'active', invitation_token = NULL,
                 invitation_expires_at = NULL, updated_at = ?3
             WHERE id = ?1 AND status = 'pending' AND {column} IS NULL
               AND invitation_expires_at > ?3"
        ),
        rusqlite::params![pair_id.to_string(), user_id.to_string(), now],
    )?;
    Ok(changed == 1)
}

pub(crate) fn slot_column(role: Role) -> &'static str {
    match role {
        Role::Parent => "parent_id",
        Role::Child => "child_id",
    }
}

/// `%term%` with LIKE wildcards in `term` escaped by backslash.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn count(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> DbResult<i64> {
    Ok(conn.query_row(sql, params, |row| row.get(0))?)
}

/// Reads a TEXT column through `FromStr` (ids, role/status enums).
fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: parse_col(row, 0)?,
        name: row.get(1)?,
        role: parse_col(row, 2)?,
        phone_ciphertext: row.get(3)?,
        phone_iv: row.get(4)?,
        phone_lookup: row.get(5)?,
        status: parse_col(row, 6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn map_pair(row: &Row<'_>) -> rusqlite::Result<PairRow> {
    Ok(PairRow {
        id: parse_col(row, 0)?,
        parent_id: parse_opt_col(row, 1)?,
        child_id: parse_opt_col(row, 2)?,
        status: parse_col(row, 3)?,
        invitation_token: row.get(4)?,
        invitation_expires_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn map_question(row: &Row<'_>) -> rusqlite::Result<QuestionRow> {
    Ok(QuestionRow {
        id: row.get(0)?,
        content: row.get(1)?,
        category: row.get(2)?,
        order_num: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Maps the seven answer columns starting at `base`.
fn map_answer(row: &Row<'_>, base: usize) -> rusqlite::Result<AnswerRow> {
    Ok(AnswerRow {
        id: parse_col(row, base)?,
        question_id: row.get(base + 1)?,
        user_id: parse_col(row, base + 2)?,
        pair_id: parse_col(row, base + 3)?,
        content: row.get(base + 4)?,
        answered_at: row.get(base + 5)?,
        updated_at: row.get(base + 6)?,
    })
}

fn map_answer_detail(row: &Row<'_>) -> rusqlite::Result<AnswerDetailRow> {
    Ok(AnswerDetailRow {
        answer: map_answer(row, 0)?,
        author_name: row.get(7)?,
        author_role: parse_col(row, 8)?,
        question_content: row.get(9)?,
        category: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::seed::SEED_QUESTIONS;
    use chrono::Duration;
    use mundap_types::models::UserStatus;

    fn user(name: &str, role: Role) -> UserRow {
        let now = Utc::now();
        UserRow {
            id: Uuid::new_v4(),
            name: name.to_string(),
            role,
            phone_ciphertext: "ct".into(),
            phone_iv: "iv".into(),
            phone_lookup: format!("lookup-{}", Uuid::new_v4()),
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    async fn active_pair(db: &Database) -> (UserRow, UserRow, PairRow) {
        let now = Utc::now();
        let parent = user("Kim", Role::Parent);
        let child = user("Minji", Role::Child);
        db.create_user(&parent).await.unwrap();
        db.create_user(&child).await.unwrap();
        let pair = PairRow::invitation(parent.id, Role::Parent, "ABCD2345".into(), now + Duration::hours(24), now);
        db.create_pair(&pair).await.unwrap();
        assert!(db.activate_pair(pair.id, child.id, Role::Child, now).await.unwrap());
        let pair = db.find_pair(pair.id).await.unwrap().unwrap();
        (parent, child, pair)
    }

    fn answer(question_id: i64, user: &UserRow, pair: &PairRow) -> AnswerRow {
        let now = Utc::now();
        AnswerRow {
            id: Uuid::new_v4(),
            question_id,
            user_id: user.id,
            pair_id: pair.id,
            content: format!("{} says hi", user.name),
            answered_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn migrations_seed_the_catalog() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.count_active_questions().await.unwrap(), SEED_QUESTIONS.len() as i64);
        let first = db.active_question_at(0).await.unwrap().unwrap();
        assert_eq!(first.order_num, 1);
        assert!(db.active_question_at(SEED_QUESTIONS.len() as i64).await.unwrap().is_none());
        assert!(db.active_question_at(-1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_phone_lookup_is_a_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        let a = user("Kim", Role::Parent);
        let mut b = user("Lee", Role::Parent);
        b.phone_lookup = a.phone_lookup.clone();
        db.create_user(&a).await.unwrap();
        let err = db.create_user(&b).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation(_)));
        assert_eq!(
            db.find_user_by_phone_lookup(&a.phone_lookup).await.unwrap().unwrap().id,
            a.id
        );
    }

    #[tokio::test]
    async fn activation_fills_slot_and_clears_token() {
        let db = Database::open_in_memory().unwrap();
        let (parent, child, pair) = active_pair(&db).await;
        assert_eq!(pair.status, PairStatus::Active);
        assert_eq!(pair.child_id, Some(child.id));
        assert!(pair.invitation_token.is_none());
        assert!(pair.invitation_expires_at.is_none());
        assert_eq!(db.find_active_pair_for_user(parent.id).await.unwrap().unwrap().id, pair.id);
        assert!(db.find_pair_by_invitation("ABCD2345").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_activation_loses() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let parent = user("Kim", Role::Parent);
        let first = user("A", Role::Child);
        let second = user("B", Role::Child);
        for u in [&parent, &first, &second] {
            db.create_user(u).await.unwrap();
        }
        let pair = PairRow::invitation(parent.id, Role::Parent, "WXYZ2345".into(), now + Duration::hours(1), now);
        db.create_pair(&pair).await.unwrap();

        assert!(db.activate_pair(pair.id, first.id, Role::Child, now).await.unwrap());
        assert!(!db.activate_pair(pair.id, second.id, Role::Child, now).await.unwrap());
    }

    #[tokio::test]
    async fn expired_invitation_cannot_activate() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let parent = user("Kim", Role::Parent);
        let child = user("Minji", Role::Child);
        db.create_user(&parent).await.unwrap();
        db.create_user(&child).await.unwrap();
        let pair = PairRow::invitation(parent.id, Role::Parent, "EXPD2345".into(), now - Duration::minutes(1), now - Duration::hours(24));
        db.create_pair(&pair).await.unwrap();

        assert!(!db.activate_pair(pair.id, child.id, Role::Child, now).await.unwrap());
        assert_eq!(db.delete_expired_invitations(now).await.unwrap(), 1);
        assert!(db.find_pair(pair.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_invitation_registration_leaves_no_user() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let parent = user("Kim", Role::Parent);
        db.create_user(&parent).await.unwrap();
        let pair = PairRow::invitation(parent.id, Role::Parent, "RACE2345".into(), now + Duration::hours(1), now);
        db.create_pair(&pair).await.unwrap();

        // wrong slot: a second parent cannot join a parent's invitation
        let other_parent = user("Park", Role::Parent);
        assert!(!db.register_with_invitation(&other_parent, pair.id, now).await.unwrap());
        assert!(db.find_user(other_parent.id).await.unwrap().is_none());

        let child = user("Minji", Role::Child);
        assert!(db.register_with_invitation(&child, pair.id, now).await.unwrap());
        assert!(db.find_user(child.id).await.unwrap().is_some());
        assert!(db.find_pair(pair.id).await.unwrap().unwrap().is_usable());
    }

    #[tokio::test]
    async fn duplicate_answer_is_rejected_by_schema() {
        let db = Database::open_in_memory().unwrap();
        let (parent, _, pair) = active_pair(&db).await;
        db.create_answer(&answer(1, &parent, &pair)).await.unwrap();
        let err = db.create_answer(&answer(1, &parent, &pair)).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn answers_join_author_and_question() {
        let db = Database::open_in_memory().unwrap();
        let (parent, child, pair) = active_pair(&db).await;
        db.create_answer(&answer(1, &child, &pair)).await.unwrap();
        db.create_answer(&answer(1, &parent, &pair)).await.unwrap();
        db.create_answer(&answer(2, &parent, &pair)).await.unwrap();

        let rows = db.answers_for_questions(pair.id, &[1]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].author_name, "Minji");
        assert_eq!(rows[0].author_role, Role::Child);
        assert_eq!(rows[0].question_content, SEED_QUESTIONS[0].1);

        let (page, total) = db.answers_for_pair(pair.id, 2, 0).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);

        assert_eq!(db.count_both_answered(pair.id).await.unwrap(), 1);
        let (history, distinct) = db.pair_history(pair.id, 10, 0).await.unwrap();
        assert_eq!(distinct, 2);
        assert_eq!(history[0].question_id, 2);
    }

    #[tokio::test]
    async fn reaction_upsert_replaces_emoji() {
        let db = Database::open_in_memory().unwrap();
        let (parent, child, pair) = active_pair(&db).await;
        let a = answer(1, &child, &pair);
        db.create_answer(&a).await.unwrap();

        for emoji in ["❤️", "😂"] {
            db.upsert_reaction(&ReactionRow {
                answer_id: a.id,
                user_id: parent.id,
                emoji: emoji.into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        let reactions = db.reactions_for_answers(&[a.id]).await.unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "😂");
        assert_eq!(db.count_reactions_received(pair.id, child.id).await.unwrap(), 1);

        assert!(db.delete_answer(a.id).await.unwrap());
        assert!(db.reactions_for_answers(&[a.id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_escapes_wildcards() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.create_question(
            &NewQuestion {
                content: "What does 100% happy feel like?".into(),
                category: "feelings".into(),
                order_num: None,
            },
            now,
        )
        .await
        .unwrap();

        let (rows, total) = db.search_questions("100%", 10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert!(rows[0].content.contains("100%"));

        let (_, none) = db.search_questions("%", 10, 0).await.unwrap();
        assert_eq!(none, 1);
    }

    #[tokio::test]
    async fn new_question_is_appended_to_rotation() {
        let db = Database::open_in_memory().unwrap();
        let q = db
            .create_question(
                &NewQuestion {
                    content: "A brand new question".into(),
                    category: "fun".into(),
                    order_num: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(q.order_num, SEED_QUESTIONS.len() as i64 + 1);
        let last = db.active_question_at(SEED_QUESTIONS.len() as i64).await.unwrap().unwrap();
        assert_eq!(last.id, q.id);

        assert!(db.deactivate_question(q.id, Utc::now()).await.unwrap());
        let (total, active) = db.question_counts().await.unwrap();
        assert_eq!(total, active + 1);
    }

    #[tokio::test]
    async fn revoked_tokens_expire_out() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let jti = Uuid::new_v4();
        assert!(db.revoke_token(jti, now + Duration::minutes(5)).await.unwrap());
        assert!(!db.revoke_token(jti, now + Duration::minutes(5)).await.unwrap());
        assert!(db.is_token_revoked(jti).await.unwrap());
        assert_eq!(db.purge_revoked_tokens(now).await.unwrap(), 0);
        assert_eq!(db.purge_revoked_tokens(now + Duration::minutes(6)).await.unwrap(), 1);
        assert!(!db.is_token_revoked(jti).await.unwrap());
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("a%b_c\\"), "%a\\%b\\_c\\\\%");
    }
}
