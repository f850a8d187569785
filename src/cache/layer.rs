//! Two-tier cache: a RAM layer in front of the persistent store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::traits::Record;
use crate::error::SyncResult;
use crate::store::{PersistentStore, StoreError, StoreExt};

/// A cached collection for one key (e.g. the packing list of one trip).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<R> {
  pub key: String,
  /// Unique by id, in display order
  pub items: Vec<R>,
  /// Last successful network fetch; None if never fetched
  pub fetched_at: Option<DateTime<Utc>>,
}

impl<R: Record> CacheEntry<R> {
  /// Fresh iff `now - fetched_at <= ttl`. Never-fetched entries are stale.
  pub fn is_fresh_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
    match self.fetched_at {
      Some(fetched_at) => now - fetched_at <= ttl,
      None => false,
    }
  }

  pub fn get(&self, id: i64) -> Option<&R> {
    self.items.iter().find(|r| r.id() == id)
  }
}

/// Where a cache write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
  /// A successful network fetch; advances `fetched_at`.
  Network,
  /// An optimistic or reconciled local mutation; keeps `fetched_at`.
  Local,
}

/// Per-collection cache. Keys are independent; each call locks the RAM layer
/// only for its own synchronous section.
pub struct TieredCache<R: Record> {
  store: Arc<dyn PersistentStore>,
  ram: Mutex<HashMap<String, CacheEntry<R>>>,
}

impl<R: Record> TieredCache<R> {
  pub fn new(store: Arc<dyn PersistentStore>) -> Self {
    Self {
      store,
      ram: Mutex::new(HashMap::new()),
    }
  }

  fn store_prefix() -> String {
    format!("cache:{}:", R::collection())
  }

  fn store_key(key: &str) -> String {
    format!("{}{}", Self::store_prefix(), key)
  }

  fn ram(&self) -> Result<MutexGuard<'_, HashMap<String, CacheEntry<R>>>, StoreError> {
    self.ram.lock().map_err(|_| StoreError::LockPoisoned)
  }

  /// RAM first; on a miss, load from the store and promote into RAM.
  pub fn read(&self, key: &str) -> SyncResult<Option<CacheEntry<R>>> {
    if let Some(entry) = self.ram()?.get(key) {
      return Ok(Some(entry.clone()));
    }

    let store_key = Self::store_key(key);
    let Some(items) = self.store.get_json::<Vec<R>>(&store_key)? else {
      return Ok(None);
    };
    let fetched_at = self.store.load_cache_timestamp(&store_key)?;

    let entry = CacheEntry {
      key: key.to_string(),
      items,
      fetched_at,
    };
    debug!(
      collection = R::collection(),
      key,
      count = entry.items.len(),
      "cache entry promoted from store"
    );

    let mut ram = self.ram()?;
    // A concurrent write may have landed while we were reading the store
    let entry = ram.entry(key.to_string()).or_insert(entry).clone();
    Ok(Some(entry))
  }

  /// Replace the items for `key`. Only `WriteOrigin::Network` advances
  /// `fetched_at`.
  pub fn write(&self, key: &str, items: Vec<R>, origin: WriteOrigin) -> SyncResult<CacheEntry<R>> {
    let previous = self.read(key)?;
    let fetched_at = match origin {
      WriteOrigin::Network => Some(Utc::now()),
      WriteOrigin::Local => previous.and_then(|e| e.fetched_at),
    };

    let entry = CacheEntry {
      key: key.to_string(),
      items: dedupe_by_id(items),
      fetched_at,
    };

    let store_key = Self::store_key(key);
    self.store.set_json(&store_key, &entry.items)?;
    if let (WriteOrigin::Network, Some(at)) = (origin, fetched_at) {
      self.store.save_cache_timestamp(&store_key, at)?;
    }

    self.ram()?.insert(key.to_string(), entry.clone());
    debug!(
      collection = R::collection(),
      key,
      count = entry.items.len(),
      ?origin,
      "cache written"
    );
    Ok(entry)
  }

  /// Apply a local mutation to the items for `key` (creating an empty entry
  /// if needed) and persist the result without touching `fetched_at`.
  pub fn update<T>(&self, key: &str, mutate: impl FnOnce(&mut Vec<R>) -> T) -> SyncResult<T> {
    let mut items = self.read(key)?.map(|e| e.items).unwrap_or_default();
    let output = mutate(&mut items);
    self.write(key, items, WriteOrigin::Local)?;
    Ok(output)
  }

  pub fn is_fresh(&self, key: &str, ttl: Duration) -> SyncResult<bool> {
    self.is_fresh_at(key, ttl, Utc::now())
  }

  pub fn is_fresh_at(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> SyncResult<bool> {
    Ok(
      self
        .read(key)?
        .map(|entry| entry.is_fresh_at(ttl, now))
        .unwrap_or(false),
    )
  }

  /// Drop `key` from both tiers.
  pub fn invalidate(&self, key: &str) -> SyncResult<()> {
    self.ram()?.remove(key);
    let store_key = Self::store_key(key);
    self.store.delete(&store_key)?;
    self.store.clear_cache_timestamp(&store_key)?;
    debug!(collection = R::collection(), key, "cache invalidated");
    Ok(())
  }

  /// Drop every key of this collection from both tiers.
  pub fn invalidate_all(&self) -> SyncResult<usize> {
    self.ram()?.clear();
    let prefix = Self::store_prefix();
    for store_key in self.store.keys_with_prefix(&prefix)? {
      self.store.clear_cache_timestamp(&store_key)?;
    }
    let removed = self.store.delete_where(&|k| k.starts_with(&prefix))?;
    debug!(collection = R::collection(), removed, "cache cleared");
    Ok(removed)
  }
}

/// Keep the first occurrence of each id.
fn dedupe_by_id<R: Record>(items: Vec<R>) -> Vec<R> {
  let mut seen = HashSet::with_capacity(items.len());
  items.into_iter().filter(|r| seen.insert(r.id())).collect()
}
