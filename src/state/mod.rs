//! Persisted per-record harvest state.

pub mod schema;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::errors::HarvestError;
use crate::models::RecordStatus;

pub use sqlite::SqliteStateStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub id: String,
    pub status: RecordStatus,
    pub last_attempt: DateTime<Utc>,
    pub resolved_commit: Option<String>,
    pub repository: Option<String>,
    pub error_kind: Option<String>,
    pub error_detail: Option<String>,
}

impl StateEntry {
    pub fn pending(id: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            status: RecordStatus::Pending,
            last_attempt: at,
            resolved_commit: None,
            repository: None,
            error_kind: None,
            error_detail: None,
        }
    }

    pub fn resolved(id: &str, at: DateTime<Utc>, commit: &str, repository: &str) -> Self {
        Self {
            status: RecordStatus::Resolved,
            resolved_commit: Some(commit.to_string()),
            repository: Some(repository.to_string()),
            ..Self::pending(id, at)
        }
    }

    pub fn with_error(id: &str, at: DateTime<Utc>, status: RecordStatus, kind: &str, detail: &str) -> Self {
        Self {
            status,
            error_kind: Some(kind.to_string()),
            error_detail: Some(detail.to_string()),
            ..Self::pending(id, at)
        }
    }
}

/// Storage for [`StateEntry`] rows keyed by record id.
pub trait StateStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<StateEntry>, HarvestError>;

    fn put(&self, entry: &StateEntry) -> Result<(), HarvestError>;

    /// All entries, optionally restricted to one status, ordered by id.
    fn list(&self, status: Option<RecordStatus>) -> Result<Vec<StateEntry>, HarvestError>;

    fn counts(&self) -> Result<BTreeMap<String, u64>, HarvestError> {
        let mut counts = BTreeMap::new();
        for entry in self.list(None)? {
            *counts.entry(entry.status.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// Non-persistent store for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, StateEntry>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, id: &str) -> Result<Option<StateEntry>, HarvestError> {
        let entries = self.entries.lock().map_err(|e| HarvestError::Store(e.to_string()))?;
        Ok(entries.get(id).cloned())
    }

    fn put(&self, entry: &StateEntry) -> Result<(), HarvestError> {
        let mut entries = self.entries.lock().map_err(|e| HarvestError::Store(e.to_string()))?;
        entries.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    fn list(&self, status: Option<RecordStatus>) -> Result<Vec<StateEntry>, HarvestError> {
        let entries = self.entries.lock().map_err(|e| HarvestError::Store(e.to_string()))?;
        let mut out: Vec<_> = entries
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStateStore::new();
        let now = Utc::now();
        store.put(&StateEntry::pending("CVE-2099-0002", now)).unwrap();
        store.put(&StateEntry::resolved("CVE-2099-0001", now, "abc", "github.com/o/r")).unwrap();

        assert_eq!(store.get("CVE-2099-0001").unwrap().unwrap().resolved_commit.as_deref(), Some("abc"));
        assert!(store.get("CVE-2099-9999").unwrap().is_none());

        let resolved = store.list(Some(RecordStatus::Resolved)).unwrap();
        assert_eq!(resolved.len(), 1);
        let all = store.list(None).unwrap();
        assert_eq!(all[0].id, "CVE-2099-0001");

        let counts = store.counts().unwrap();
        assert_eq!(counts.get("pending"), Some(&1));
        assert_eq!(counts.get("resolved"), Some(&1));
    }
}
