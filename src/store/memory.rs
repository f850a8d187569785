//! In-memory store used by tests and ephemeral runs.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::traits::{PersistentStore, StoreError};

/// `PersistentStore` backed by maps. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
  values: Mutex<BTreeMap<String, Vec<u8>>>,
  timestamps: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl PersistentStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let values = self.values.lock().map_err(|_| StoreError::LockPoisoned)?;
    Ok(values.get(key).cloned())
  }

  fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
    let mut values = self.values.lock().map_err(|_| StoreError::LockPoisoned)?;
    values.insert(key.to_string(), value.to_vec());
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<(), StoreError> {
    let mut values = self.values.lock().map_err(|_| StoreError::LockPoisoned)?;
    values.remove(key);
    Ok(())
  }

  fn delete_where(&self, predicate: &dyn Fn(&str) -> bool) -> Result<usize, StoreError> {
    let mut values = self.values.lock().map_err(|_| StoreError::LockPoisoned)?;
    let before = values.len();
    values.retain(|key, _| !predicate(key));
    Ok(before - values.len())
  }

  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
    let values = self.values.lock().map_err(|_| StoreError::LockPoisoned)?;
    Ok(
      values
        .keys()
        .filter(|k| k.starts_with(prefix))
        .cloned()
        .collect(),
    )
  }

  fn save_cache_timestamp(&self, key: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
    let mut timestamps = self.timestamps.lock().map_err(|_| StoreError::LockPoisoned)?;
    timestamps.insert(key.to_string(), at);
    Ok(())
  }

  fn load_cache_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let timestamps = self.timestamps.lock().map_err(|_| StoreError::LockPoisoned)?;
    Ok(timestamps.get(key).copied())
  }

  fn clear_cache_timestamp(&self, key: &str) -> Result<(), StoreError> {
    let mut timestamps = self.timestamps.lock().map_err(|_| StoreError::LockPoisoned)?;
    timestamps.remove(key);
    Ok(())
  }
}
