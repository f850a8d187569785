//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// Trait for records that can be cached, queued and reconciled.
///
/// Every record carries a stable integer id. Ids created locally before the
/// server has acknowledged the record are negative (see [`is_temporary_id`]).
pub trait Record: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
  fn id(&self) -> i64;

  fn set_id(&mut self, id: i64);

  /// Server-side modification stamp, used to skip redundant replacements
  /// during reconciliation. None if the record doesn't track it.
  fn updated_at(&self) -> Option<DateTime<Utc>>;

  /// Collection name for storage namespacing (e.g., "trip", "packing_item")
  fn collection() -> &'static str;

  /// Reject caller-supplied data before any network call.
  fn validate(&self) -> Result<(), String> {
    Ok(())
  }

  /// Copy fields that only exist locally (never on the wire) from an older
  /// copy of the same record.
  fn carry_local_fields(&mut self, _previous: &Self) {}
}

/// Ids minted locally for records the server hasn't acknowledged yet.
pub fn is_temporary_id(id: i64) -> bool {
  id < 0
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was last fetched from the network (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: Option<DateTime<Utc>>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, considered stale but network fetch in progress or failed
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}
