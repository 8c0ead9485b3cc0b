//! Storage abstraction for the ingestion pipeline.
//!
//! The [`CredentialStore`] trait covers the two write operations ingestion
//! needs: interning an entity value and persisting a record triple. The
//! SQLite backend is used for real runs; the in-memory backend serves
//! `ingest --dry-run` and tests.
//!
//! Implementations must be `Send + Sync`: the ingestion driver may call them
//! from several in-flight lines at once.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{EntityKind, RecordOutcome, Triple};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Write side of the credential store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`resolve`](CredentialStore::resolve) | Find-or-create an entity, returning its id |
/// | [`insert_record`](CredentialStore::insert_record) | Persist a triple unless it already exists |
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the id of the entity holding exactly `value`, creating it on
    /// first sight. Concurrent callers with the same value get the same id.
    async fn resolve(&self, kind: EntityKind, value: &str) -> Result<i64, StoreError>;

    /// Persists the triple. An existing identical triple is reported as
    /// [`RecordOutcome::Duplicate`], never as an error.
    async fn insert_record(&self, triple: Triple) -> Result<RecordOutcome, StoreError>;
}

/// Rejects values no backend can represent faithfully.
pub(crate) fn check_value(kind: EntityKind, value: &str) -> Result<(), StoreError> {
    if value.contains('\0') {
        return Err(StoreError::Invalid(format!("{} contains a NUL character", kind)));
    }
    Ok(())
}
