use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// File name of the session store inside the tool root.
pub const SESSION_DB_FILE: &str = "session.db";

/// Directory owned by the tool at the project root.
pub const TOOL_ROOT: &str = ".atzentis";

pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30))
        .pragma("foreign_keys", "ON");

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open (and migrate) the session store under `<project_root>/.atzentis/`.
pub async fn open_project_pool(project_root: &Path) -> Result<SqlitePool, sqlx::Error> {
    let dir = project_root.join(TOOL_ROOT);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    let db_path = dir.join(SESSION_DB_FILE);
    let url = format!("sqlite://{}", db_path.display());
    create_pool(&url).await
}

/// Whether a session store file already exists for the project. Resume
/// refuses to run without one.
pub fn store_exists(project_root: &Path) -> bool {
    project_root.join(TOOL_ROOT).join(SESSION_DB_FILE).exists()
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
