use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Corrupt session column {column}: {source}")]
    CorruptColumn {
        column: &'static str,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, DbError>;
