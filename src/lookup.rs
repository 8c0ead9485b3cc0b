//! Credential lookups by entity value or full email address.
//!
//! Shared by the `passdb lookup` / `passdb email` CLI commands and the
//! `/api/v1` HTTP routes. Query values are canonicalized the same way
//! ingestion stores them, so `Example.COM` finds `example.com`.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::{Config, ServerConfig};
use crate::db;
use crate::models::{CredentialRow, EntityKind};
use crate::normalize::split_email;

/// A validated 1-based page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub per_page: u32,
}

impl Page {
    /// Applies defaults and clamps `per_page` to `[server].max_per_page`.
    /// Zero for either value is an error.
    pub fn new(
        page: Option<u32>,
        per_page: Option<u32>,
        server: &ServerConfig,
    ) -> Result<Self, String> {
        let page = page.unwrap_or(1);
        let per_page = per_page.unwrap_or(server.default_per_page);
        if page == 0 {
            return Err("page must be >= 1".to_string());
        }
        if per_page == 0 {
            return Err("per_page must be >= 1".to_string());
        }
        Ok(Self {
            page,
            per_page: per_page.min(server.max_per_page),
        })
    }

    fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.per_page as i64
    }
}

const CREDENTIAL_COLUMNS: &str = r#"
    SELECT u.name AS username, d.domain AS domain, p.password AS password
    FROM records r
    JOIN usernames u ON u.id = r.username_id
    JOIN domains d ON d.id = r.domain_id
    JOIN passwords p ON p.id = r.password_id
"#;

fn row_to_credential(row: &sqlx::sqlite::SqliteRow) -> CredentialRow {
    CredentialRow {
        username: row.get("username"),
        domain: row.get("domain"),
        password: row.get("password"),
    }
}

fn sort_by_username(mut rows: Vec<CredentialRow>) -> Vec<CredentialRow> {
    rows.sort_by(|a, b| a.username.cmp(&b.username));
    rows
}

/// Returns one page of the records referencing the `kind` entity whose value
/// is `value`. The page is taken in record-id order, then sorted by username.
/// An unknown value yields an empty list.
pub async fn lookup(
    pool: &SqlitePool,
    kind: EntityKind,
    value: &str,
    page: Page,
) -> Result<Vec<CredentialRow>, sqlx::Error> {
    let sql = format!(
        "{} WHERE r.{} = (SELECT id FROM {} WHERE {} = ?) ORDER BY r.id LIMIT ? OFFSET ?",
        CREDENTIAL_COLUMNS,
        kind.record_column(),
        kind.table(),
        kind.column()
    );

    let rows = sqlx::query(&sql)
        .bind(kind.canonicalize(value))
        .bind(page.per_page as i64)
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(sort_by_username(rows.iter().map(row_to_credential).collect()))
}

/// Returns every record for the exact username+domain pair of `email`, or
/// `None` when `email` has no `@`.
pub async fn records_by_email(
    pool: &SqlitePool,
    email: &str,
) -> Result<Option<Vec<CredentialRow>>, sqlx::Error> {
    let Some((username, domain)) = split_email(email) else {
        return Ok(None);
    };

    let sql = format!(
        "{} WHERE u.name = ? AND d.domain = ? ORDER BY r.id",
        CREDENTIAL_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(username)
        .bind(domain)
        .fetch_all(pool)
        .await?;

    Ok(Some(sort_by_username(
        rows.iter().map(row_to_credential).collect(),
    )))
}

fn print_rows(rows: &[CredentialRow]) {
    if rows.is_empty() {
        println!("No results.");
        return;
    }
    for row in rows {
        println!("{}@{}:{}", row.username, row.domain, row.password);
    }
}

/// CLI entry point for `passdb lookup`.
pub async fn run_lookup(
    config: &Config,
    kind: EntityKind,
    value: &str,
    page: Option<u32>,
    per_page: Option<u32>,
) -> Result<()> {
    let page = match Page::new(page, per_page, &config.server) {
        Ok(page) => page,
        Err(msg) => bail!(msg),
    };

    let pool = db::connect_initialized(config).await?;
    let result = lookup(&pool, kind, value, page).await;
    pool.close().await;

    print_rows(&result?);
    Ok(())
}

/// CLI entry point for `passdb email`.
pub async fn run_email(config: &Config, email: &str) -> Result<()> {
    let pool = db::connect_initialized(config).await?;
    let result = records_by_email(&pool, email).await;
    pool.close().await;

    match result? {
        Some(rows) => print_rows(&rows),
        None => bail!("'{}' is not an email address (no '@')", email),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            default_per_page: 50,
            max_per_page: 100,
        }
    }

    #[test]
    fn page_defaults_and_clamps() {
        let page = Page::new(None, None, &server()).unwrap();
        assert_eq!(page, Page { page: 1, per_page: 50 });
        assert_eq!(page.offset(), 0);

        let page = Page::new(Some(3), Some(5000), &server()).unwrap();
        assert_eq!(page.per_page, 100);
        assert_eq!(page.offset(), 200);
    }

    #[test]
    fn zero_page_or_size_is_rejected() {
        assert!(Page::new(Some(0), None, &server()).is_err());
        assert!(Page::new(None, Some(0), &server()).is_err());
    }
}
