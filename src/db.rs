use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(config.db.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.db.max_connections)
        .acquire_timeout(config.ingest.store_timeout())
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

    Ok(pool)
}

/// Connects and confirms the schema exists. Used by commands that read or
/// write credentials, so an uninitialized database fails before any work.
pub async fn connect_initialized(config: &Config) -> Result<SqlitePool> {
    let pool = connect(config).await?;

    let tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
         AND name IN ('usernames', 'domains', 'passwords', 'records')",
    )
    .fetch_one(&pool)
    .await
    .context("Database is unavailable")?;

    if tables < 4 {
        pool.close().await;
        anyhow::bail!(
            "database {} is not initialized; run `passdb init` first",
            config.db.path.display()
        );
    }

    Ok(pool)
}
