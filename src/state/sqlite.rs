use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::HarvestError;
use crate::models::RecordStatus;
use super::{StateEntry, StateStore};

const COLUMNS: &str = "id, status, last_attempt, resolved_commit, repository, error_kind, error_detail";

/// SQLite-backed state. Writes from concurrent workers serialize on the
/// connection mutex.
pub struct SqliteStateStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| HarvestError::Store(format!("Failed to open state database {}: {}", path.display(), e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| HarvestError::Store(format!("Failed to set pragmas: {}", e)))?;

        let store = Self { conn: Arc::new(Mutex::new(conn)) };
        store.initialize()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| HarvestError::Store(format!("Failed to open in-memory db: {}", e)))?;
        let store = Self { conn: Arc::new(Mutex::new(conn)) };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<(), HarvestError> {
        self.lock()?
            .execute_batch(super::schema::CREATE_TABLES)
            .map_err(|e| HarvestError::Store(format!("Failed to create tables: {}", e)))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, HarvestError> {
        self.conn.lock().map_err(|e| HarvestError::Store(format!("State lock poisoned: {}", e)))
    }
}

impl Clone for SqliteStateStore {
    fn clone(&self) -> Self {
        Self { conn: self.conn.clone() }
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<StateEntry> {
    let status: String = row.get(1)?;
    let last_attempt: String = row.get(2)?;
    Ok(StateEntry {
        id: row.get(0)?,
        status: RecordStatus::parse(&status).unwrap_or(RecordStatus::Pending),
        last_attempt: DateTime::parse_from_rfc3339(&last_attempt)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        resolved_commit: row.get(3)?,
        repository: row.get(4)?,
        error_kind: row.get(5)?,
        error_detail: row.get(6)?,
    })
}

impl StateStore for SqliteStateStore {
    fn get(&self, id: &str) -> Result<Option<StateEntry>, HarvestError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM harvest_state WHERE id = ?1", COLUMNS);
        conn.query_row(&sql, rusqlite::params![id], row_to_entry)
            .optional()
            .map_err(|e| HarvestError::Store(format!("Query failed: {}", e)))
    }

    fn put(&self, entry: &StateEntry) -> Result<(), HarvestError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO harvest_state (id, status, last_attempt, resolved_commit, repository, error_kind, error_detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                last_attempt = excluded.last_attempt,
                resolved_commit = excluded.resolved_commit,
                repository = excluded.repository,
                error_kind = excluded.error_kind,
                error_detail = excluded.error_detail",
            rusqlite::params![
                entry.id,
                entry.status.as_str(),
                entry.last_attempt.to_rfc3339(),
                entry.resolved_commit,
                entry.repository,
                entry.error_kind,
                entry.error_detail,
            ],
        ).map_err(|e| HarvestError::Store(format!("Failed to save state for {}: {}", entry.id, e)))?;
        Ok(())
    }

    fn list(&self, status: Option<RecordStatus>) -> Result<Vec<StateEntry>, HarvestError> {
        let conn = self.lock()?;
        let (sql, params): (String, Vec<&str>) = match &status {
            Some(s) => (
                format!("SELECT {} FROM harvest_state WHERE status = ?1 ORDER BY id", COLUMNS),
                vec![s.as_str()],
            ),
            None => (format!("SELECT {} FROM harvest_state ORDER BY id", COLUMNS), vec![]),
        };
        let mut stmt = conn.prepare(&sql)
            .map_err(|e| HarvestError::Store(format!("Query failed: {}", e)))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), row_to_entry)
            .map_err(|e| HarvestError::Store(format!("Query failed: {}", e)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| HarvestError::Store(format!("Row decode failed: {}", e)))
    }

    fn counts(&self) -> Result<std::collections::BTreeMap<String, u64>, HarvestError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM harvest_state GROUP BY status")
            .map_err(|e| HarvestError::Store(format!("Query failed: {}", e)))?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| HarvestError::Store(format!("Query failed: {}", e)))?;
        let mut counts = std::collections::BTreeMap::new();
        for row in rows {
            let (status, n) = row.map_err(|e| HarvestError::Store(format!("Row decode failed: {}", e)))?;
            counts.insert(status, n as u64);
        }
        Ok(counts)
    }
}
