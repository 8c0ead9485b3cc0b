//! SQLite [`CredentialStore`] backed by an `sqlx` pool.
//!
//! Entity creation is an explicit insert-then-fetch-on-conflict sequence. The
//! unique index on each value column decides every race: whoever loses the
//! insert reads back the winner's id.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::{check_value, CredentialStore};
use crate::error::StoreError;
use crate::models::{EntityKind, RecordOutcome, Triple};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find(&self, kind: EntityKind, value: &str) -> Result<Option<i64>, StoreError> {
        let id = sqlx::query_scalar(select_sql(kind))
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }
}

fn select_sql(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Username => "SELECT id FROM usernames WHERE name = ?",
        EntityKind::Domain => "SELECT id FROM domains WHERE domain = ?",
        EntityKind::Password => "SELECT id FROM passwords WHERE password = ?",
    }
}

fn insert_sql(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Username => {
            "INSERT INTO usernames (name) VALUES (?) ON CONFLICT(name) DO NOTHING RETURNING id"
        }
        EntityKind::Domain => {
            "INSERT INTO domains (domain) VALUES (?) ON CONFLICT(domain) DO NOTHING RETURNING id"
        }
        EntityKind::Password => {
            "INSERT INTO passwords (password) VALUES (?) \
             ON CONFLICT(password) DO NOTHING RETURNING id"
        }
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn resolve(&self, kind: EntityKind, value: &str) -> Result<i64, StoreError> {
        check_value(kind, value)?;

        // Most values repeat across a dump; a read is cheaper than a write.
        if let Some(id) = self.find(kind, value).await? {
            return Ok(id);
        }

        let inserted: Option<i64> = match sqlx::query_scalar(insert_sql(kind))
            .bind(value)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(id) => id,
            Err(e) => match StoreError::from(e) {
                StoreError::Duplicate => None,
                other => return Err(other),
            },
        };
        if let Some(id) = inserted {
            return Ok(id);
        }

        // Lost the race between our read and our insert.
        self.find(kind, value).await?.ok_or_else(|| {
            StoreError::Transient(format!("{} vanished after insert conflict", kind))
        })
    }

    async fn insert_record(&self, triple: Triple) -> Result<RecordOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO records (username_id, domain_id, password_id) VALUES (?, ?, ?)
            ON CONFLICT(password_id, domain_id, username_id) DO NOTHING
            "#,
        )
        .bind(triple.username_id)
        .bind(triple.domain_id)
        .bind(triple.password_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Ok(RecordOutcome::Duplicate),
            Ok(_) => Ok(RecordOutcome::Created),
            Err(e) => match StoreError::from(e) {
                StoreError::Duplicate => Ok(RecordOutcome::Duplicate),
                other => Err(other),
            },
        }
    }
}
