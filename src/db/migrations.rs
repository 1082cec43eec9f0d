//! Schema setup for the pricing factor database.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Executor;
use std::path::Path;
use tracing::info;

const MAX_CONNECTIONS: u32 = 5;

/// Open (creating if needed) the factor database and apply the schema.
///
/// Readers share the pool with profit-rate writes, so the file runs in WAL
/// mode.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    apply_schema(&pool).await?;

    info!(path = db_path, "pricing database initialized");
    Ok(pool)
}

/// Every statement in `schema.sql` is idempotent.
async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    pool.execute(include_str!("schema.sql")).await?;
    Ok(())
}
