use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

use crate::error::DbResult;
use crate::seed::SEED_QUESTIONS;

pub fn run(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("DB: running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                  TEXT PRIMARY KEY,
                name                TEXT NOT NULL,
                role                TEXT NOT NULL CHECK (role IN ('parent', 'child')),
                phone_ciphertext    TEXT NOT NULL,
                phone_iv            TEXT NOT NULL,
                phone_lookup        TEXT NOT NULL UNIQUE,
                status              TEXT NOT NULL DEFAULT 'active'
                                    CHECK (status IN ('active', 'inactive')),
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE TABLE pairs (
                id                      TEXT PRIMARY KEY,
                parent_id               TEXT REFERENCES users(id),
                child_id                TEXT REFERENCES users(id),
                status                  TEXT NOT NULL DEFAULT 'pending'
                                        CHECK (status IN ('pending', 'active', 'inactive')),
                invitation_token        TEXT UNIQUE,
                invitation_expires_at   TEXT,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            CREATE INDEX idx_pairs_parent ON pairs(parent_id, status);
            CREATE INDEX idx_pairs_child ON pairs(child_id, status);

            CREATE TABLE questions (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                content     TEXT NOT NULL,
                category    TEXT NOT NULL,
                order_num   INTEGER NOT NULL DEFAULT 0,
                is_active   INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_questions_rotation
                ON questions(is_active, order_num, created_at);

            CREATE TABLE answers (
                id          TEXT PRIMARY KEY,
                question_id INTEGER NOT NULL REFERENCES questions(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                pair_id     TEXT NOT NULL REFERENCES pairs(id),
                content     TEXT NOT NULL,
                answered_at TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                UNIQUE(question_id, user_id, pair_id)
            );

            CREATE INDEX idx_answers_pair ON answers(pair_id, answered_at);

            CREATE TABLE reactions (
                answer_id   TEXT NOT NULL REFERENCES answers(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id),
                emoji       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (answer_id, user_id)
            );

            CREATE TABLE revoked_tokens (
                jti         TEXT PRIMARY KEY,
                expires_at  TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("DB: running migration v2 (seed question catalog)");
        let now = Utc::now();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO questions (content, category, order_num, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?4)",
            )?;
            for (i, (category, content)) in SEED_QUESTIONS.iter().enumerate() {
                stmt.execute(rusqlite::params![content, category, i as i64 + 1, now])?;
            }
        }
        tx.execute("INSERT INTO schema_version (version) VALUES (2)", [])?;
        tx.commit()?;
    }

    info!("Database migrations complete");
    Ok(())
}
