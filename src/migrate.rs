use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates every table and index. Safe to run repeatedly.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Entity tables: one row per distinct value
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS usernames (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS domains (
            id INTEGER PRIMARY KEY,
            domain TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS passwords (
            id INTEGER PRIMARY KEY,
            password TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per distinct credential exposure
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY,
            password_id INTEGER NOT NULL REFERENCES passwords(id),
            domain_id INTEGER NOT NULL REFERENCES domains(id),
            username_id INTEGER NOT NULL REFERENCES usernames(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Completed archive entries, for `ingest --resume`
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingested_entries (
            archive TEXT NOT NULL,
            entry TEXT NOT NULL,
            added INTEGER NOT NULL,
            duplicate INTEGER NOT NULL,
            malformed INTEGER NOT NULL,
            completed_at INTEGER NOT NULL,
            PRIMARY KEY (archive, entry)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Serialized HTTP responses keyed by method and request target
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS response_cache (
            key TEXT PRIMARY KEY,
            body BLOB NOT NULL,
            stored_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Uniqueness is the single source of truth for deduplication
    for ddl in [
        "CREATE UNIQUE INDEX IF NOT EXISTS index_usernames_on_name ON usernames(name)",
        "CREATE UNIQUE INDEX IF NOT EXISTS index_domains_on_domain ON domains(domain)",
        "CREATE UNIQUE INDEX IF NOT EXISTS index_passwords_on_password ON passwords(password)",
        "CREATE UNIQUE INDEX IF NOT EXISTS index_records_on_triple \
         ON records(password_id, domain_id, username_id)",
        "CREATE INDEX IF NOT EXISTS index_records_on_username_id ON records(username_id)",
        "CREATE INDEX IF NOT EXISTS index_records_on_domain_id ON records(domain_id)",
        "CREATE INDEX IF NOT EXISTS index_records_on_username_id_and_domain_id \
         ON records(username_id, domain_id)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}
