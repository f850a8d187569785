use std::sync::{Arc, Mutex};

use crate::error::SyncResult;
use crate::store::{PersistentStore, StoreError, StoreExt};

const COUNTER_KEY: &str = "temp_id_counter";

/// Mints temporary ids (-1, -2, ...) for records created before the server
/// has seen them. The counter is persisted on every allocation, so ids never
/// repeat across restarts.
pub struct TempIdAllocator {
  store: Arc<dyn PersistentStore>,
  last: Mutex<i64>,
}

impl TempIdAllocator {
  pub fn load(store: Arc<dyn PersistentStore>) -> SyncResult<Self> {
    let last = store.get_json::<i64>(COUNTER_KEY)?.unwrap_or(0).min(0);
    Ok(Self {
      store,
      last: Mutex::new(last),
    })
  }

  pub fn next(&self) -> SyncResult<i64> {
    let mut last = self.last.lock().map_err(|_| StoreError::LockPoisoned)?;
    let id = *last - 1;
    self.store.set_json(COUNTER_KEY, &id)?;
    *last = id;
    Ok(id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;

  #[test]
  fn test_ids_strictly_decrease_across_restarts() {
    let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
    let ids = TempIdAllocator::load(store.clone()).unwrap();
    assert_eq!(ids.next().unwrap(), -1);
    assert_eq!(ids.next().unwrap(), -2);

    let restarted = TempIdAllocator::load(store).unwrap();
    assert_eq!(restarted.next().unwrap(), -3);
  }
}
