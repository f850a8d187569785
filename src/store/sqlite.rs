//! SQLite-backed persistent store.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::traits::{PersistentStore, StoreError};

/// Schema for the key-value table and the cache timestamp registry.
const STORE_SCHEMA: &str = r#"
-- Serialized records (cache entries, pending queues, session, counters)
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Last successful network fetch per cache key
CREATE TABLE IF NOT EXISTS cache_timestamps (
    key TEXT PRIMARY KEY,
    fetched_at TEXT NOT NULL
);
"#;

fn backend(context: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
  move |e| StoreError::Backend(format!("{}: {}", context, e))
}

/// SQLite storage. A single connection guarded by a mutex; every call is a
/// short synchronous statement.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`, creating parent directories.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreError::Backend(format!("Failed to create store directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      StoreError::Backend(format!(
        "Failed to open store database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory().map_err(backend("Failed to open in-memory store"))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self, StoreError> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(backend("Failed to run store migrations"))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl PersistentStore for SqliteStore {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    conn
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(backend("Failed to read value"))
  }

  fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    conn
      .execute(
        "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(backend("Failed to store value"))?;
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    conn
      .execute("DELETE FROM kv WHERE key = ?", params![key])
      .map_err(backend("Failed to delete value"))?;
    Ok(())
  }

  fn delete_where(&self, predicate: &dyn Fn(&str) -> bool) -> Result<usize, StoreError> {
    let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    let tx = conn
      .transaction()
      .map_err(backend("Failed to begin transaction"))?;

    let keys: Vec<String> = {
      let mut stmt = tx
        .prepare("SELECT key FROM kv")
        .map_err(backend("Failed to prepare key scan"))?;
      let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(backend("Failed to scan keys"))?;
      let all = rows
        .collect::<Result<Vec<_>, _>>()
        .map_err(backend("Failed to read key"))?;
      all.into_iter().filter(|k| predicate(k)).collect()
    };

    for key in &keys {
      tx.execute("DELETE FROM kv WHERE key = ?", params![key])
        .map_err(backend("Failed to delete value"))?;
    }

    tx.commit().map_err(backend("Failed to commit transaction"))?;
    Ok(keys.len())
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    let mut stmt = conn
      .prepare("SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
      .map_err(backend("Failed to prepare key scan"))?;
    let keys = stmt
      .query_map(params![prefix], |row| row.get::<_, String>(0))
      .map_err(backend("Failed to scan keys"))?
      .collect::<Result<Vec<_>, _>>()
      .map_err(backend("Failed to read key"))?;
    Ok(keys)
  }

  fn save_cache_timestamp(&self, key: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_timestamps (key, fetched_at) VALUES (?, ?)",
        params![key, at.to_rfc3339()],
      )
      .map_err(backend("Failed to save cache timestamp"))?;
    Ok(())
  }

  fn load_cache_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    let raw: Option<String> = conn
      .query_row(
        "SELECT fetched_at FROM cache_timestamps WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(backend("Failed to load cache timestamp"))?;

    raw
      .map(|s| {
        DateTime::parse_from_rfc3339(&s)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| StoreError::Serialization(format!("bad timestamp '{}': {}", s, e)))
      })
      .transpose()
  }

  fn clear_cache_timestamp(&self, key: &str) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    conn
      .execute("DELETE FROM cache_timestamps WHERE key = ?", params![key])
      .map_err(backend("Failed to clear cache timestamp"))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::StoreExt;

  #[test]
  fn test_values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.db");
    let fetched = Utc::now();

    {
      let store = SqliteStore::open(&path).unwrap();
      store.set_json("pending:packing_item:1", &vec!["a", "b"]).unwrap();
      store.save_cache_timestamp("cache:trip:all", fetched).unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let pending: Option<Vec<String>> = store.get_json("pending:packing_item:1").unwrap();
    assert_eq!(pending, Some(vec!["a".to_string(), "b".to_string()]));
    let loaded = store.load_cache_timestamp("cache:trip:all").unwrap().unwrap();
    assert_eq!(loaded.timestamp_millis(), fetched.timestamp_millis());
  }

  #[test]
  fn test_prefix_scan_and_predicate_delete() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.set("cache:trip:all", b"[]").unwrap();
    store.set("cache:packing_item:3", b"[]").unwrap();
    store.set("pending:packing_item:3", b"[]").unwrap();

    assert_eq!(
      store.keys_with_prefix("cache:").unwrap(),
      vec!["cache:packing_item:3".to_string(), "cache:trip:all".to_string()]
    );

    let removed = store.delete_where(&|k| k.starts_with("cache:")).unwrap();
    assert_eq!(removed, 2);
    assert!(store.get("cache:trip:all").unwrap().is_none());
    assert!(store.get("pending:packing_item:3").unwrap().is_some());
  }

  #[test]
  fn test_unreadable_key_fails_scan_and_keeps_rows() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.set("pending:packing_item:3", b"[]").unwrap();
    store
      .conn
      .lock()
      .unwrap()
      .execute("INSERT INTO kv (key, value) VALUES (X'FF00', X'00')", [])
      .unwrap();

    let result = store.delete_where(&|_| true);

    assert!(matches!(result, Err(StoreError::Backend(_))));
    assert!(store.get("pending:packing_item:3").unwrap().is_some());
  }

  #[test]
  fn test_delete_missing_key_is_ok() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.delete("nope").unwrap();
    store.clear_cache_timestamp("nope").unwrap();
    assert_eq!(store.load_cache_timestamp("nope").unwrap(), None);
  }
}
