//! Core data types shared by the ingestion pipeline and the query layer.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// One of the three deduplicated value tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Username,
    Domain,
    Password,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Username,
        EntityKind::Domain,
        EntityKind::Password,
    ];

    /// Table holding this kind of entity.
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Username => "usernames",
            EntityKind::Domain => "domains",
            EntityKind::Password => "passwords",
        }
    }

    /// Unique value column of [`table`](Self::table).
    pub fn column(self) -> &'static str {
        match self {
            EntityKind::Username => "name",
            EntityKind::Domain => "domain",
            EntityKind::Password => "password",
        }
    }

    /// Foreign key column in `records` pointing at this kind.
    pub fn record_column(self) -> &'static str {
        match self {
            EntityKind::Username => "username_id",
            EntityKind::Domain => "domain_id",
            EntityKind::Password => "password_id",
        }
    }

    /// Canonical form of a query value. Usernames and domains are stored
    /// lower-cased; passwords are case-sensitive.
    pub fn canonicalize(self, value: &str) -> String {
        match self {
            EntityKind::Username | EntityKind::Domain => value.to_lowercase(),
            EntityKind::Password => value.to_string(),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Username => "username",
            EntityKind::Domain => "domain",
            EntityKind::Password => "password",
        };
        f.write_str(name)
    }
}

impl FromStr for EntityKind {
    type Err = String;

    /// Accepts singular (`domain`) and plural (`domains`) spellings so the
    /// same parser serves CLI arguments and HTTP path segments.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "username" | "usernames" => Ok(EntityKind::Username),
            "domain" | "domains" => Ok(EntityKind::Domain),
            "password" | "passwords" => Ok(EntityKind::Password),
            other => Err(format!(
                "unknown entity kind '{}': expected username, domain, or password",
                other
            )),
        }
    }
}

/// A normalized credential line, before entity resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub domain: String,
    pub password: String,
    /// Lower-cased `user@domain` as it appeared on the line.
    pub email: String,
}

impl Credential {
    pub fn value(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Username => &self.username,
            EntityKind::Domain => &self.domain,
            EntityKind::Password => &self.password,
        }
    }
}

/// Resolved entity ids identifying one unique record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Triple {
    pub username_id: i64,
    pub domain_id: i64,
    pub password_id: i64,
}

/// Result of persisting a [`Triple`] that the store accepted or ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    Duplicate,
}

/// How a single input line was accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Added,
    Duplicate,
    Malformed,
}

/// Running or final counters for an entry or a whole archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounts {
    pub added: u64,
    pub duplicate: u64,
    pub malformed: u64,
}

impl IngestCounts {
    pub fn lines(&self) -> u64 {
        self.added + self.duplicate + self.malformed
    }

    pub fn absorb(&mut self, other: IngestCounts) {
        self.added += other.added;
        self.duplicate += other.duplicate;
        self.malformed += other.malformed;
    }
}

/// One stored credential, as returned by lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialRow {
    pub username: String,
    pub domain: String,
    pub password: String,
}
