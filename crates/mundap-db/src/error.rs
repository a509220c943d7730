use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

/// Storage failures. Constraint violations are classified so the API layer
/// can answer 409/400 instead of a blanket 500, whichever backend raised them.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("not-null constraint violated: {0}")]
    NotNullViolation(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("DB lock poisoned: {0}")]
    Poisoned(String),

    #[error("sqlite: {0}")]
    Sqlite(rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error("postgres: {0}")]
    Postgres(sqlx::Error),
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ffi;

        if let rusqlite::Error::SqliteFailure(err, msg) = &e {
            let detail = msg.clone().unwrap_or_else(|| err.to_string());
            match err.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return Self::UniqueViolation(detail);
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return Self::ForeignKeyViolation(detail),
                ffi::SQLITE_CONSTRAINT_NOTNULL => return Self::NotNullViolation(detail),
                _ => {}
            }
        }
        Self::Sqlite(e)
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            let detail = db.message().to_string();
            match db.code().as_deref() {
                Some("23505") => return Self::UniqueViolation(detail),
                Some("23503") => return Self::ForeignKeyViolation(detail),
                Some("23502") => return Self::NotNullViolation(detail),
                _ => {}
            }
        }
        Self::Postgres(e)
    }
}
