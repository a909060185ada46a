//! In-memory snapshot of a repository's records.
//!
//! A snapshot is the observable projection of the backing store. It is
//! rebuilt wholesale on refresh and patched one key at a time after local
//! mutations. Uses BTreeMap instead of HashMap so iteration and
//! serialization are deterministic.

use crate::{LocalStatus, Record, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Records keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSnapshot {
    records: BTreeMap<RecordId, Record>,
}

impl RecordSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from a list of records. Later duplicates win.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    /// Replace every record. Returns whether the contents changed.
    pub fn replace_all(&mut self, records: impl IntoIterator<Item = Record>) -> bool {
        let next = Self::from_records(records);
        if *self == next {
            return false;
        }
        *self = next;
        true
    }

    /// Insert or replace a single record. Returns whether anything changed.
    ///
    /// A record whose id changed (a local id replaced by a remote one) is
    /// also removed under its old local id.
    pub fn upsert(&mut self, record: Record) -> bool {
        let mut changed = false;
        if let Some(local_id) = &record.local_id {
            if *local_id != record.id {
                changed |= self.records.remove(local_id).is_some();
            }
        }
        if self.records.get(&record.id) == Some(&record) {
            return changed;
        }
        self.records.insert(record.id.clone(), record);
        true
    }

    /// Remove records by id. Returns whether anything was removed.
    pub fn remove_all<I, S>(&mut self, ids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut changed = false;
        for id in ids {
            changed |= self.records.remove(id.as_ref()).is_some();
        }
        changed
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &RecordId> {
        self.records.keys()
    }

    /// Number of records per local status.
    pub fn status_counts(&self) -> BTreeMap<LocalStatus, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records.values() {
            *counts.entry(record.local_status()).or_insert(0) += 1;
        }
        counts
    }

    /// Records with changes waiting for the next sync up.
    pub fn pending_count(&self) -> usize {
        self.records.values().filter(|r| r.is_local()).count()
    }

    /// Case-insensitive substring search over every string field.
    ///
    /// A blank term matches everything.
    pub fn search(&self, term: &str) -> Vec<&Record> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return self.records.values().collect();
        }
        self.records
            .values()
            .filter(|r| {
                r.fields.values().any(|v| match v {
                    Value::String(s) => s.to_lowercase().contains(&needle),
                    _ => false,
                })
            })
            .collect()
    }
}
