use crate::config::AppConfig;
use crate::error::AppError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

const MAX_POOL_CONNECTIONS: u32 = 4;
// Another dashboard process may hold the write lock while syncing favorites.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn initialize_pool_from_path(path: &Path) -> Result<SqlitePool, AppError> {
    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_POOL_CONNECTIONS)
        .connect_with(connect_options)
        .await?;
    run_migrations(&pool).await?;

    tracing::debug!(path = %path.display(), "sqlite pool ready");
    Ok(pool)
}

/// Creates the data directory if needed, then opens and migrates the
/// configured database file.
pub async fn initialize_pool(config: &AppConfig) -> Result<SqlitePool, AppError> {
    std::fs::create_dir_all(&config.data_dir)?;
    initialize_pool_from_path(&config.db_path()).await
}
