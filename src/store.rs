//! Saved-set storage — the engine's only persistence capability.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::slots::SetSlot;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Slot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A complete saved DJ set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSet {
    pub id: String,
    pub name: String,
    pub slots: Vec<SetSlot>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_profile_id: Option<String>,
}

/// List-view summary of a saved set.
#[derive(Debug, Clone, Serialize)]
pub struct SavedSetSummary {
    pub id: String,
    pub name: String,
    pub slot_count: usize,
    pub created_at: String,
}

/// Storage capability consumed by the pipeline.
pub trait SetStore: Send + Sync {
    fn create_saved_set(
        &self,
        name: &str,
        slots: Vec<SetSlot>,
        phase_profile_id: Option<&str>,
    ) -> Result<SavedSet>;

    fn get_saved_set(&self, id: &str) -> Result<Option<SavedSet>>;

    fn list_saved_sets(&self) -> Result<Vec<SavedSetSummary>>;
}

/// SQLite-backed set store. Slots are stored as a JSON column — sets are
/// read and written whole, never queried by slot.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sets (
                id               TEXT PRIMARY KEY,
                name             TEXT NOT NULL,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL,
                phase_profile_id TEXT,
                slots            TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sets_created ON sets(created_at);
            ",
        )?;
        Ok(())
    }
}

impl SetStore for SqliteStore {
    fn create_saved_set(
        &self,
        name: &str,
        slots: Vec<SetSlot>,
        phase_profile_id: Option<&str>,
    ) -> Result<SavedSet> {
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let now = Utc::now().to_rfc3339();
        let slots_json = serde_json::to_string(&slots)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sets (id, name, created_at, updated_at, phase_profile_id, slots)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, name, now, now, phase_profile_id, slots_json],
        )?;

        Ok(SavedSet {
            id,
            name: name.to_string(),
            slots,
            created_at: now.clone(),
            updated_at: now,
            phase_profile_id: phase_profile_id.map(str::to_string),
        })
    }

    fn get_saved_set(&self, id: &str) -> Result<Option<SavedSet>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, updated_at, phase_profile_id, slots
             FROM sets WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let slots_json: String = row.get(5)?;
        Ok(Some(SavedSet {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
            phase_profile_id: row.get(4)?,
            slots: serde_json::from_str(&slots_json)?,
        }))
    }

    fn list_saved_sets(&self) -> Result<Vec<SavedSetSummary>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, slots FROM sets ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, name, created_at, slots_json) = row?;
            let slots: Vec<SetSlot> = serde_json::from_str(&slots_json)?;
            summaries.push(SavedSetSummary {
                id,
                name,
                slot_count: slots.len(),
                created_at,
            });
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::SlotSource;

    fn slot(i: usize) -> SetSlot {
        SetSlot {
            id: format!("autoset-slot-{i}"),
            source: SlotSource::Autoset {
                id: "act-0".into(),
                name: "Warm-Up".into(),
            },
            tracks: vec![None; 10],
            selected_track_index: 0,
        }
    }

    #[test]
    fn test_create_and_get_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let saved = store
            .create_saved_set("Test Set", vec![slot(0), slot(1)], Some("classic_arc"))
            .unwrap();
        assert_eq!(saved.id.len(), 8);

        let loaded = store.get_saved_set(&saved.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Test Set");
        assert_eq!(loaded.slots.len(), 2);
        assert_eq!(loaded.slots, saved.slots);
        assert_eq!(loaded.phase_profile_id.as_deref(), Some("classic_arc"));
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get_saved_set("nope").unwrap().is_none());
    }

    #[test]
    fn test_list_summaries() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_saved_set("One", vec![slot(0)], None).unwrap();
        store.create_saved_set("Two", vec![slot(0), slot(1)], None).unwrap();
        let summaries = store.list_saved_sets().unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().any(|s| s.name == "Two" && s.slot_count == 2));
    }
}
