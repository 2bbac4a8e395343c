//! Optional persistence port for snapshotting the held collection.
//!
//! The store invokes the backend at defined checkpoints (after successful
//! fetches and mutations); the backend never sees in-flight mutation state.
//! On load the record cache is rebuilt from the persisted collection rather
//! than trusted from a separately persisted dump.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::record::Record;

/// Snapshot of the store state that survives process restarts.
///
/// Records are an explicit ordered list of `(id, record)` pairs, so load
/// order never depends on map iteration order.
#[derive(Debug, Clone)]
pub struct Snapshot<E> {
  pub scope: String,
  pub records: Vec<(String, E)>,
  pub last_fetch_at: Option<DateTime<Utc>>,
}

/// Storage port invoked by the store facade at checkpoints.
pub trait PersistBackend<E: Record>: Send + Sync {
  /// Persist the snapshot, replacing any previous one.
  fn save(&self, snapshot: &Snapshot<E>) -> Result<(), StoreError>;

  /// Load the last persisted snapshot, if any.
  fn load(&self) -> Result<Option<Snapshot<E>>, StoreError>;
}

/// Backend that persists nothing. Used when persistence is disabled.
pub struct NoopPersist;

impl<E: Record> PersistBackend<E> for NoopPersist {
  fn save(&self, _snapshot: &Snapshot<E>) -> Result<(), StoreError> {
    Ok(()) // Discard
  }

  fn load(&self) -> Result<Option<Snapshot<E>>, StoreError> {
    Ok(None) // Nothing persisted
  }
}

/// SQLite-backed snapshot persistence.
pub struct SqlitePersist {
  conn: Mutex<Connection>,
}

impl SqlitePersist {
  /// Open or create the snapshot database at the default location.
  pub fn open() -> Result<Self, StoreError> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| StoreError::Persist {
        reason: format!("failed to create snapshot directory: {e}"),
      })?;
    }

    let conn = Connection::open(&path).map_err(|e| StoreError::Persist {
      reason: format!("failed to open snapshot database at {}: {}", path.display(), e),
    })?;

    Self::from_connection(conn)
  }

  /// Open or create the snapshot database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self, StoreError> {
    let conn = Connection::open(path).map_err(|e| StoreError::Persist {
      reason: format!("failed to open snapshot database at {}: {}", path.display(), e),
    })?;

    Self::from_connection(conn)
  }

  /// In-memory database, used by tests.
  pub fn open_in_memory() -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory().map_err(|e| StoreError::Persist {
      reason: format!("failed to open in-memory snapshot database: {e}"),
    })?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    let persist = Self {
      conn: Mutex::new(conn),
    };
    persist.run_migrations()?;
    Ok(persist)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StoreError::Persist {
        reason: "could not determine data directory".to_string(),
      })?;

    Ok(data_dir.join("notestore").join("snapshot.db"))
  }

  fn run_migrations(&self) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

    conn
      .execute_batch(SNAPSHOT_SCHEMA)
      .map_err(|e| StoreError::Persist {
        reason: format!("failed to run snapshot migrations: {e}"),
      })?;

    Ok(())
  }
}

/// Schema for snapshot tables.
const SNAPSHOT_SCHEMA: &str = r#"
-- One snapshot per record type
CREATE TABLE IF NOT EXISTS snapshot_meta (
    record_type TEXT PRIMARY KEY,
    scope TEXT NOT NULL,
    last_fetch_at TEXT,
    saved_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Collection entries in order (serialized JSON)
CREATE TABLE IF NOT EXISTS snapshot_records (
    record_type TEXT NOT NULL,
    position INTEGER NOT NULL,
    record_id TEXT NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (record_type, position)
);
"#;

impl<E: Record> PersistBackend<E> for SqlitePersist {
  fn save(&self, snapshot: &Snapshot<E>) -> Result<(), StoreError> {
    let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    let record_type = E::record_type();

    // Dropping an uncommitted transaction rolls it back, so a failed save
    // never leaves the connection inside an open transaction.
    let tx = conn.transaction().map_err(|e| StoreError::Persist {
      reason: format!("failed to begin transaction: {e}"),
    })?;

    tx.execute(
      "DELETE FROM snapshot_records WHERE record_type = ?",
      params![record_type],
    )
    .map_err(|e| StoreError::Persist {
      reason: format!("failed to delete old snapshot rows: {e}"),
    })?;

    tx.execute(
      "INSERT OR REPLACE INTO snapshot_meta (record_type, scope, last_fetch_at, saved_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![
        record_type,
        snapshot.scope,
        snapshot.last_fetch_at.map(|at| at.to_rfc3339()),
      ],
    )
    .map_err(|e| StoreError::Persist {
      reason: format!("failed to update snapshot metadata: {e}"),
    })?;

    for (position, (id, record)) in snapshot.records.iter().enumerate() {
      let data = serde_json::to_vec(record).map_err(|e| StoreError::Persist {
        reason: format!("failed to serialize record {id}: {e}"),
      })?;

      tx.execute(
        "INSERT OR REPLACE INTO snapshot_records (record_type, position, record_id, data)
         VALUES (?, ?, ?, ?)",
        params![record_type, position, id, data],
      )
      .map_err(|e| StoreError::Persist {
        reason: format!("failed to store record {id}: {e}"),
      })?;
    }

    tx.commit().map_err(|e| StoreError::Persist {
      reason: format!("failed to commit transaction: {e}"),
    })
  }

  fn load(&self) -> Result<Option<Snapshot<E>>, StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    let record_type = E::record_type();

    let mut stmt = conn
      .prepare("SELECT scope, last_fetch_at FROM snapshot_meta WHERE record_type = ?")
      .map_err(|e| StoreError::Persist {
        reason: format!("failed to prepare metadata query: {e}"),
      })?;

    // Only "no rows" means no snapshot; any other failure is a real error.
    let meta: Option<(String, Option<String>)> = stmt
      .query_row(params![record_type], |row| Ok((row.get(0)?, row.get(1)?)))
      .optional()
      .map_err(|e| StoreError::Persist {
        reason: format!("failed to read snapshot metadata: {e}"),
      })?;

    let (scope, last_fetch_at_str) = match meta {
      Some(meta) => meta,
      None => return Ok(None),
    };

    let last_fetch_at = last_fetch_at_str.map(|s| parse_datetime(&s)).transpose()?;

    let mut stmt = conn
      .prepare(
        "SELECT record_id, data FROM snapshot_records
         WHERE record_type = ?
         ORDER BY position",
      )
      .map_err(|e| StoreError::Persist {
        reason: format!("failed to prepare record query: {e}"),
      })?;

    let rows: Vec<(String, Vec<u8>)> = stmt
      .query_map(params![record_type], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| StoreError::Persist {
        reason: format!("failed to query snapshot records: {e}"),
      })?
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| StoreError::Persist {
        reason: format!("failed to read snapshot row: {e}"),
      })?;

    let mut records = Vec::with_capacity(rows.len());
    for (id, data) in rows {
      let record: E = serde_json::from_slice(&data).map_err(|e| StoreError::Persist {
        reason: format!("failed to deserialize record {id}: {e}"),
      })?;
      records.push((id, record));
    }

    Ok(Some(Snapshot {
      scope,
      records,
      last_fetch_at,
    }))
  }
}

/// Parse an RFC 3339 timestamp stored by `save`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StoreError::Persist {
      reason: format!("failed to parse timestamp '{s}': {e}"),
    })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::note::{Note, NoteDraft};
  use chrono::Utc;

  fn note(id: &str, title: &str) -> Note {
    Note::from_draft(
      "u1",
      &NoteDraft {
        title: Some(title.to_string()),
        ..Default::default()
      },
      id.to_string(),
      Utc::now(),
    )
  }

  fn snapshot(notes: Vec<Note>) -> Snapshot<Note> {
    Snapshot {
      scope: "u1".to_string(),
      records: notes.into_iter().map(|n| (n.id.clone(), n)).collect(),
      last_fetch_at: Some(Utc::now()),
    }
  }

  #[test]
  fn load_without_save_is_none() {
    let persist = SqlitePersist::open_in_memory().unwrap();
    let loaded: Option<Snapshot<Note>> = persist.load().unwrap();
    assert!(loaded.is_none());
  }

  #[test]
  fn save_then_load_preserves_order_and_content() {
    let persist = SqlitePersist::open_in_memory().unwrap();
    let saved = snapshot(vec![note("b", "second"), note("a", "first")]);
    PersistBackend::<Note>::save(&persist, &saved).unwrap();

    let loaded: Snapshot<Note> = persist.load().unwrap().unwrap();
    assert_eq!(loaded.scope, "u1");
    assert_eq!(
      loaded.records.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(),
      vec!["b", "a"]
    );
    assert_eq!(loaded.records[0].1, saved.records[0].1);
    assert!(loaded.last_fetch_at.is_some());
  }

  #[test]
  fn saving_again_replaces_the_previous_snapshot() {
    let persist = SqlitePersist::open_in_memory().unwrap();
    PersistBackend::<Note>::save(&persist, &snapshot(vec![note("a", "x"), note("b", "y")]))
      .unwrap();
    PersistBackend::<Note>::save(&persist, &snapshot(vec![note("c", "z")])).unwrap();

    let loaded: Snapshot<Note> = persist.load().unwrap().unwrap();
    assert_eq!(loaded.records.len(), 1);
    assert_eq!(loaded.records[0].0, "c");
  }

  #[test]
  fn empty_collection_round_trips() {
    let persist = SqlitePersist::open_in_memory().unwrap();
    PersistBackend::<Note>::save(&persist, &snapshot(vec![])).unwrap();

    let loaded: Snapshot<Note> = persist.load().unwrap().unwrap();
    assert!(loaded.records.is_empty());
  }

  /// Record whose serialization always fails, for driving save errors.
  #[derive(Debug, Clone, serde::Deserialize)]
  struct Unstorable {
    id: String,
  }

  impl serde::Serialize for Unstorable {
    fn serialize<S>(&self, _serializer: S) -> Result<S::Ok, S::Error>
    where
      S: serde::Serializer,
    {
      Err(<S::Error as serde::ser::Error>::custom("refused"))
    }
  }

  impl Record for Unstorable {
    type Draft = ();
    type Patch = ();

    fn id(&self) -> &str {
      &self.id
    }

    fn owner(&self) -> &str {
      "u1"
    }

    fn updated_at(&self) -> DateTime<Utc> {
      Utc::now()
    }

    fn from_draft(_scope: &str, _draft: &(), temp_id: String, _now: DateTime<Utc>) -> Self {
      Self { id: temp_id }
    }

    fn apply_patch(&self, _patch: &(), _now: DateTime<Utc>) -> Self {
      self.clone()
    }

    fn search_text(&self) -> Vec<&str> {
      Vec::new()
    }

    fn record_type() -> &'static str {
      "unstorable"
    }
  }

  #[test]
  fn failed_save_rolls_back_and_later_saves_succeed() {
    let persist = SqlitePersist::open_in_memory().unwrap();

    let broken = Snapshot {
      scope: "u1".to_string(),
      records: vec![(
        "a".to_string(),
        Unstorable {
          id: "a".to_string(),
        },
      )],
      last_fetch_at: None,
    };
    assert!(PersistBackend::<Unstorable>::save(&persist, &broken).is_err());

    // The connection must not be stuck inside the aborted transaction.
    PersistBackend::<Note>::save(&persist, &snapshot(vec![note("a", "x")])).unwrap();
    let loaded: Snapshot<Note> = persist.load().unwrap().unwrap();
    assert_eq!(loaded.records.len(), 1);
  }

  #[test]
  fn unreadable_record_row_surfaces_an_error() {
    let persist = SqlitePersist::open_in_memory().unwrap();
    PersistBackend::<Note>::save(&persist, &snapshot(vec![note("a", "x"), note("b", "y")]))
      .unwrap();

    // Clobber one row's payload with the wrong column type.
    persist
      .conn
      .lock()
      .unwrap()
      .execute(
        "UPDATE snapshot_records SET data = 12345 WHERE record_id = 'a'",
        [],
      )
      .unwrap();

    // A partial collection must never load as if it were complete.
    let loaded: Result<Option<Snapshot<Note>>, _> = persist.load();
    assert!(matches!(loaded, Err(StoreError::Persist { .. })));
  }

  #[test]
  fn unreadable_metadata_surfaces_an_error_not_an_empty_store() {
    let persist = SqlitePersist::open_in_memory().unwrap();
    PersistBackend::<Note>::save(&persist, &snapshot(vec![note("a", "x")])).unwrap();

    persist
      .conn
      .lock()
      .unwrap()
      .execute("UPDATE snapshot_meta SET scope = x'00ff'", [])
      .unwrap();

    let loaded: Result<Option<Snapshot<Note>>, _> = persist.load();
    assert!(matches!(loaded, Err(StoreError::Persist { .. })));
  }
}
