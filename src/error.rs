//! Error taxonomy for the ingestion pipeline.
//!
//! Only [`ArchiveError::Open`] and [`ArchiveError::Read`] stop an ingest run.
//! Every other variant is recovered at the line or entry where it occurs.

use std::path::PathBuf;
use thiserror::Error;

/// A raw line that cannot be decomposed into username, domain and password.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("malformed line: {0}")]
    Malformed(&'static str),
}

/// Failure of a single resolve or persist operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("duplicate value")]
    Duplicate,

    /// The value or triple violates a non-uniqueness constraint.
    #[error("rejected by store: {0}")]
    Invalid(String),

    /// Connection drop, lock contention, or timeout. Worth one retry.
    #[error("transient store failure: {0}")]
    Transient(String),
}

// SQLite primary result codes for lock contention.
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        match err {
            sqlx::Error::Database(db) => match db.kind() {
                ErrorKind::UniqueViolation => StoreError::Duplicate,
                ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation
                | ErrorKind::ForeignKeyViolation => StoreError::Invalid(db.message().to_string()),
                _ => {
                    let code = db.code();
                    // Extended codes (e.g. 517 = BUSY_SNAPSHOT) share the low byte.
                    let primary = code
                        .as_deref()
                        .and_then(|c| c.parse::<u32>().ok())
                        .map(|c| (c & 0xff).to_string());
                    match primary.as_deref() {
                        Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => {
                            StoreError::Transient(db.message().to_string())
                        }
                        _ => StoreError::Invalid(db.message().to_string()),
                    }
                }
            },
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::WorkerCrashed => StoreError::Transient(err.to_string()),
            other => StoreError::Invalid(other.to_string()),
        }
    }
}

/// Failure while reading the archive container.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot open archive {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive stream is corrupt: {0}")]
    Read(#[from] std::io::Error),

    /// A line of the entry is not valid UTF-8 text. The rest of the entry
    /// is skipped.
    #[error("entry {entry} is not valid text at line {line}: {source}")]
    Undecodable {
        entry: String,
        line: u64,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

impl ArchiveError {
    /// Whether ingestion may continue with the next entry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ArchiveError::Undecodable { .. })
    }
}
