//! Persistent store contract.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Failure reported by a store backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
  #[error("store backend error: {0}")]
  Backend(String),

  #[error("failed to (de)serialize stored value: {0}")]
  Serialization(String),

  #[error("store lock poisoned")]
  LockPoisoned,
}

/// Durable key → bytes storage plus a small cache timestamp registry.
///
/// The sync core only persists through this trait; it never owns the backing
/// engine. Implementations must be safe to share across tasks.
pub trait PersistentStore: Send + Sync {
  /// Read the raw value stored under `key`.
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

  /// Insert or replace the value stored under `key`.
  fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

  /// Remove `key`. Removing a missing key is not an error.
  fn delete(&self, key: &str) -> Result<(), StoreError>;

  /// Remove every key matching `predicate`, returning how many were removed.
  fn delete_where(&self, predicate: &dyn Fn(&str) -> bool) -> Result<usize, StoreError>;

  /// All stored keys starting with `prefix`, in ascending order.
  fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

  /// Record when the collection stored under `key` was last fetched.
  fn save_cache_timestamp(&self, key: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

  fn load_cache_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

  fn clear_cache_timestamp(&self, key: &str) -> Result<(), StoreError>;
}

/// JSON helpers available on every store, including `dyn PersistentStore`.
pub trait StoreExt {
  fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError>;

  fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError>;
}

impl<S: PersistentStore + ?Sized> StoreExt for S {
  fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
    match self.get(key)? {
      Some(bytes) => serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::Serialization(format!("{}: {}", key, e))),
      None => Ok(None),
    }
  }

  fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
    let bytes =
      serde_json::to_vec(value).map_err(|e| StoreError::Serialization(format!("{}: {}", key, e)))?;
    self.set(key, &bytes)
  }
}
