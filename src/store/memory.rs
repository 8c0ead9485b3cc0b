//! In-memory [`CredentialStore`] for dry runs and tests.
//!
//! Uses `HashMap`/`HashSet` behind a single `std::sync::Mutex`, so every
//! operation is atomic and the same uniqueness rules as SQLite hold.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{check_value, CredentialStore};
use crate::error::StoreError;
use crate::models::{EntityKind, RecordOutcome, Triple};

#[derive(Default)]
struct Interned {
    ids: HashMap<String, i64>,
    next_id: i64,
}

impl Interned {
    fn resolve(&mut self, value: &str) -> i64 {
        if let Some(id) = self.ids.get(value) {
            return *id;
        }
        self.next_id += 1;
        self.ids.insert(value.to_string(), self.next_id);
        self.next_id
    }

    fn contains_id(&self, id: i64) -> bool {
        id >= 1 && id <= self.next_id
    }
}

#[derive(Default)]
struct Tables {
    usernames: Interned,
    domains: Interned,
    passwords: Interned,
    records: HashSet<Triple>,
}

impl Tables {
    fn interned(&self, kind: EntityKind) -> &Interned {
        match kind {
            EntityKind::Username => &self.usernames,
            EntityKind::Domain => &self.domains,
            EntityKind::Password => &self.passwords,
        }
    }

    fn interned_mut(&mut self, kind: EntityKind) -> &mut Interned {
        match kind {
            EntityKind::Username => &mut self.usernames,
            EntityKind::Domain => &mut self.domains,
            EntityKind::Password => &mut self.passwords,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct values interned for `kind`.
    pub fn entity_count(&self, kind: EntityKind) -> usize {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.interned(kind).ids.len()
    }

    pub fn record_count(&self) -> usize {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.records.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn resolve(&self, kind: EntityKind, value: &str) -> Result<i64, StoreError> {
        check_value(kind, value)?;
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tables.interned_mut(kind).resolve(value))
    }

    async fn insert_record(&self, triple: Triple) -> Result<RecordOutcome, StoreError> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());

        let dangling = [
            (EntityKind::Username, triple.username_id),
            (EntityKind::Domain, triple.domain_id),
            (EntityKind::Password, triple.password_id),
        ]
        .into_iter()
        .find(|(kind, id)| !tables.interned(*kind).contains_id(*id));
        if let Some((kind, id)) = dangling {
            return Err(StoreError::Invalid(format!("no {} with id {}", kind, id)));
        }

        if tables.records.insert(triple) {
            Ok(RecordOutcome::Created)
        } else {
            Ok(RecordOutcome::Duplicate)
        }
    }
}
