//! One cache + queue + reconciler triple per record type.

use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use super::ids::TempIdAllocator;
use super::queue::{EnqueueOutcome, OperationKind, PendingOperation, PendingQueue};
use super::reconcile::{
  accept_server_record, merge, overlay_pending, remove, resolve_temp_id, restore, upsert,
};
use crate::cache::{is_temporary_id, CacheResult, Record, TieredCache, WriteOrigin};
use crate::error::{SyncError, SyncResult};
use crate::event::{EventBus, SyncEvent};
use crate::reachability::Reachability;
use crate::store::{PersistentStore, StoreError};

/// Server side of a collection. `key` scopes the collection (e.g. a trip id
/// for its packing list).
pub trait RemoteCollection<R: Record>: Send + Sync + 'static {
  fn fetch(&self, key: &str) -> impl Future<Output = SyncResult<Vec<R>>> + Send;

  /// Returns the record as stored by the server, with its real id.
  fn create(&self, key: &str, record: &R) -> impl Future<Output = SyncResult<R>> + Send;

  fn update(&self, key: &str, record: &R) -> impl Future<Output = SyncResult<R>> + Send;

  fn delete(&self, key: &str, id: i64) -> impl Future<Output = SyncResult<()>> + Send;
}

#[derive(Debug, Clone, Copy)]
pub struct CollectionOptions {
  pub ttl: Duration,
  /// When false, deletes need connectivity and fail with
  /// `NetworkUnavailable` instead of being queued.
  pub offline_deletes: bool,
}

impl Default for CollectionOptions {
  fn default() -> Self {
    Self {
      ttl: Duration::seconds(300),
      offline_deletes: true,
    }
  }
}

/// Outcome of replaying one key's pending queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
  pub replayed: usize,
  pub failed: usize,
  /// Skipped because an earlier operation on the same record failed
  pub skipped: usize,
  pub remaining: usize,
}

struct Inner<R: Record, A> {
  remote: Arc<A>,
  cache: TieredCache<R>,
  store: Arc<dyn PersistentStore>,
  ids: Arc<TempIdAllocator>,
  reachability: Arc<Reachability>,
  events: EventBus,
  options: CollectionOptions,
  queues: Mutex<HashMap<String, Arc<PendingQueue<R>>>>,
  key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
  refreshing: Mutex<HashSet<String>>,
  refresh_on_reconnect: Mutex<HashSet<String>>,
  /// Temporary id -> server id, for handles taken before a create was acked
  resolved_ids: Mutex<HashMap<i64, i64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
  mutex.lock().map_err(|_| StoreError::LockPoisoned)
}

/// Clears a key from the background refresh set when the task ends.
struct RefreshingGuard<R: Record, A> {
  inner: Arc<Inner<R, A>>,
  key: String,
}

impl<R: Record, A> Drop for RefreshingGuard<R, A> {
  fn drop(&mut self) {
    if let Ok(mut refreshing) = self.inner.refreshing.lock() {
      refreshing.remove(&self.key);
    }
  }
}

/// Offline-capable view of one record type.
///
/// Reads come from the tiered cache; mutations are applied optimistically,
/// sent through `A`, and queued when the server can't be reached. Mutations
/// and flushes of the same key run one at a time.
pub struct Collection<R: Record, A: RemoteCollection<R>> {
  inner: Arc<Inner<R, A>>,
}

impl<R: Record, A: RemoteCollection<R>> Clone for Collection<R, A> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<R: Record, A: RemoteCollection<R>> Collection<R, A> {
  pub fn new(
    remote: Arc<A>,
    store: Arc<dyn PersistentStore>,
    ids: Arc<TempIdAllocator>,
    reachability: Arc<Reachability>,
    events: EventBus,
    options: CollectionOptions,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        remote,
        cache: TieredCache::new(store.clone()),
        store,
        ids,
        reachability,
        events,
        options,
        queues: Mutex::new(HashMap::new()),
        key_locks: Mutex::new(HashMap::new()),
        refreshing: Mutex::new(HashSet::new()),
        refresh_on_reconnect: Mutex::new(HashSet::new()),
        resolved_ids: Mutex::new(HashMap::new()),
      }),
    }
  }

  pub fn name(&self) -> &'static str {
    R::collection()
  }

  fn queue(&self, key: &str) -> SyncResult<Arc<PendingQueue<R>>> {
    let mut queues = lock(&self.inner.queues)?;
    if let Some(queue) = queues.get(key) {
      return Ok(Arc::clone(queue));
    }
    let queue = Arc::new(PendingQueue::load(self.inner.store.clone(), key)?);
    queues.insert(key.to_string(), Arc::clone(&queue));
    Ok(queue)
  }

  async fn lock_key(&self, key: &str) -> SyncResult<OwnedMutexGuard<()>> {
    let key_lock = {
      let mut locks = lock(&self.inner.key_locks)?;
      Arc::clone(locks.entry(key.to_string()).or_default())
    };
    Ok(key_lock.lock_owned().await)
  }

  /// The id a record is known by now: the server id once its create was
  /// acknowledged, otherwise `id` itself.
  fn current_id(&self, id: i64) -> SyncResult<i64> {
    if !is_temporary_id(id) {
      return Ok(id);
    }
    Ok(lock(&self.inner.resolved_ids)?.get(&id).copied().unwrap_or(id))
  }

  fn remember_resolved(&self, temp_id: i64, server_id: i64) -> SyncResult<()> {
    lock(&self.inner.resolved_ids)?.insert(temp_id, server_id);
    Ok(())
  }

  /// Cached items for `key`, fetching from the server when the cache is
  /// stale and the network is up.
  ///
  /// A failed fetch with cached data available degrades to the stale data
  /// and a [`SyncEvent::Notice`].
  pub async fn load(&self, key: &str) -> SyncResult<CacheResult<Vec<R>>> {
    let cached = self.inner.cache.read(key)?;
    if let Some(entry) = &cached {
      if entry.is_fresh_at(self.inner.options.ttl, Utc::now()) {
        return Ok(CacheResult::from_cache(
          entry.items.clone(),
          entry.fetched_at,
          false,
        ));
      }
    }

    if !self.inner.reachability.is_online() {
      self.mark_refresh_on_reconnect(key)?;
      return match cached {
        Some(entry) => Ok(CacheResult::offline(entry.items, entry.fetched_at)),
        None => Err(SyncError::NetworkUnavailable),
      };
    }

    match self.refresh(key).await {
      Ok(items) => Ok(CacheResult::from_network(items)),
      Err(err) if err != SyncError::SessionExpired => match cached {
        Some(entry) => {
          warn!(collection = R::collection(), key, error = %err, "refresh failed, serving cache");
          self.inner.events.emit(SyncEvent::Notice(format!(
            "Showing saved {} data: {}",
            R::collection(),
            err
          )));
          Ok(CacheResult::from_cache(entry.items, entry.fetched_at, true))
        }
        None => Err(err),
      },
      Err(err) => Err(err),
    }
  }

  /// Cached items for `key` without waiting on the network. A stale key gets
  /// one background refresh; further reads while it runs don't start another.
  pub fn read(&self, key: &str) -> SyncResult<CacheResult<Vec<R>>> {
    let cached = self.inner.cache.read(key)?;
    let (items, fetched_at, fresh) = match cached {
      Some(entry) => {
        let fresh = entry.is_fresh_at(self.inner.options.ttl, Utc::now());
        (entry.items, entry.fetched_at, fresh)
      }
      None => (Vec::new(), None, false),
    };

    if fresh {
      return Ok(CacheResult::from_cache(items, fetched_at, false));
    }
    if !self.inner.reachability.is_online() {
      self.mark_refresh_on_reconnect(key)?;
      return Ok(CacheResult::offline(items, fetched_at));
    }

    self.spawn_refresh(key)?;
    Ok(CacheResult::from_cache(items, fetched_at, true))
  }

  fn spawn_refresh(&self, key: &str) -> SyncResult<bool> {
    if !lock(&self.inner.refreshing)?.insert(key.to_string()) {
      debug!(collection = R::collection(), key, "background refresh already running");
      return Ok(false);
    }

    let guard = RefreshingGuard {
      inner: Arc::clone(&self.inner),
      key: key.to_string(),
    };
    let this = self.clone();
    tokio::spawn(async move {
      let key = guard.key.clone();
      if let Err(err) = this.refresh(&key).await {
        warn!(collection = R::collection(), key = %key, error = %err, "background refresh failed");
        if err.is_connectivity() {
          if let Err(mark_err) = this.mark_refresh_on_reconnect(&key) {
            warn!(
              collection = R::collection(),
              key = %key,
              error = %mark_err,
              "could not mark key for reconnect"
            );
          }
        }
        if err != SyncError::SessionExpired {
          this.inner.events.emit(SyncEvent::Notice(format!(
            "Could not refresh {}: {}",
            R::collection(),
            err
          )));
        }
      }
      drop(guard);
    });
    Ok(true)
  }

  /// Fetch `key` from the server and merge it into the cache, keeping
  /// unsynced local changes on top.
  ///
  /// Holds the key lock across the fetch so the snapshot can't predate a
  /// mutation or flush that lands while it is in flight.
  pub async fn refresh(&self, key: &str) -> SyncResult<Vec<R>> {
    let _guard = self.lock_key(key).await?;
    let fetched = self.inner.remote.fetch(key).await?;

    let current = self
      .inner
      .cache
      .read(key)?
      .map(|e| e.items)
      .unwrap_or_default();
    let mut items = merge(&current, &fetched);
    overlay_pending(&mut items, &self.queue(key)?.snapshot()?);

    let entry = self
      .inner
      .cache
      .write(key, items, WriteOrigin::Network)?;
    info!(
      collection = R::collection(),
      key,
      fetched = fetched.len(),
      cached = entry.items.len(),
      "collection refreshed"
    );
    Ok(entry.items)
  }

  /// Create `record` under a temporary id. Returns the server copy once
  /// acknowledged, or the temporary copy if the create was queued.
  pub async fn create(&self, key: &str, record: R) -> SyncResult<R> {
    record.validate().map_err(SyncError::Validation)?;
    let _guard = self.lock_key(key).await?;

    let mut record = record;
    let temp_id = self.inner.ids.next()?;
    record.set_id(temp_id);
    self.inner.cache.update(key, |items| {
      upsert(items, record.clone());
    })?;

    if !self.inner.reachability.is_online() {
      self.defer(key, OperationKind::Create, record.clone())?;
      return Ok(record);
    }

    match self.inner.remote.create(key, &record).await {
      Ok(server) => {
        self.remember_resolved(temp_id, server.id())?;
        self.inner.cache.update(key, |items| {
          let server_id = server.id();
          resolve_temp_id(items, temp_id, server.clone());
          items
            .iter()
            .find(|r| r.id() == server_id)
            .cloned()
            .unwrap_or(server)
        })
      }
      Err(err) if err.is_connectivity() => {
        self.defer(key, OperationKind::Create, record.clone())?;
        Ok(record)
      }
      Err(err) => {
        warn!(collection = R::collection(), key, error = %err, "create rejected, rolling back");
        self.inner.cache.update(key, |items| {
          remove(items, temp_id);
        })?;
        Err(err)
      }
    }
  }

  /// Replace a record. Records with queued operations (or a temporary id)
  /// are queued behind them so the server sees changes in order. A temporary
  /// id that has since been resolved is rewritten to the server id.
  pub async fn update(&self, key: &str, record: R) -> SyncResult<R> {
    record.validate().map_err(SyncError::Validation)?;
    let _guard = self.lock_key(key).await?;
    let queue = self.queue(key)?;

    let mut record = record;
    let id = self.current_id(record.id())?;
    if id != record.id() {
      debug!(
        collection = R::collection(),
        key,
        temp_id = record.id(),
        id,
        "update through resolved temporary id"
      );
      record.set_id(id);
    }
    let (record, previous) = self.inner.cache.update(key, |items| {
      let mut record = record;
      let previous = items.iter().find(|r| r.id() == id).cloned();
      if let Some(previous) = &previous {
        record.carry_local_fields(previous);
      }
      upsert(items, record.clone());
      (record, previous)
    })?;

    let deferred =
      is_temporary_id(id) || !self.inner.reachability.is_online() || queue.has_pending_for(id)?;
    if deferred {
      self.defer(key, OperationKind::Update, record.clone())?;
      return Ok(record);
    }

    match self.inner.remote.update(key, &record).await {
      Ok(server) => self
        .inner
        .cache
        .update(key, |items| accept_server_record(items, server)),
      Err(err) if err.is_connectivity() => {
        self.defer(key, OperationKind::Update, record.clone())?;
        Ok(record)
      }
      Err(err) => {
        warn!(collection = R::collection(), key, id, error = %err, "update rejected, rolling back");
        self.inner.cache.update(key, |items| match previous {
          Some(previous) => {
            upsert(items, previous);
          }
          None => {
            remove(items, id);
          }
        })?;
        Err(err)
      }
    }
  }

  /// Remove a record. Online-only collections refuse while offline and
  /// leave the cache untouched.
  pub async fn delete(&self, key: &str, id: i64) -> SyncResult<()> {
    let _guard = self.lock_key(key).await?;
    let queue = self.queue(key)?;
    let id = self.current_id(id)?;

    let online = self.inner.reachability.is_online();
    if !online && !self.inner.options.offline_deletes && !is_temporary_id(id) {
      return Err(SyncError::NetworkUnavailable);
    }

    let known = self
      .inner
      .cache
      .read(key)?
      .is_some_and(|entry| entry.get(id).is_some());
    let removed = if known {
      self.inner.cache.update(key, |items| remove(items, id))?
    } else {
      None
    };
    let Some((position, record)) = removed else {
      return Err(SyncError::Validation(format!(
        "no {} with id {} in '{}'",
        R::collection(),
        id,
        key
      )));
    };

    if is_temporary_id(id) || !online || queue.has_pending_for(id)? {
      self.defer(key, OperationKind::Delete, record)?;
      return Ok(());
    }

    match self.inner.remote.delete(key, id).await {
      Ok(()) | Err(SyncError::Http(404)) => Ok(()),
      Err(err) if err.is_connectivity() && self.inner.options.offline_deletes => {
        self.defer(key, OperationKind::Delete, record)?;
        Ok(())
      }
      Err(err) => {
        warn!(collection = R::collection(), key, id, error = %err, "delete rejected, rolling back");
        self.inner.cache.update(key, |items| restore(items, position, record))?;
        Err(err)
      }
    }
  }

  fn defer(&self, key: &str, kind: OperationKind, record: R) -> SyncResult<EnqueueOutcome> {
    let target_id = record.id();
    let outcome = self
      .queue(key)?
      .enqueue(PendingOperation::new(kind, record))?;
    info!(
      collection = R::collection(),
      key,
      target_id,
      ?kind,
      ?outcome,
      "mutation deferred"
    );
    Ok(outcome)
  }

  /// Replay the pending queue of `key` in order.
  ///
  /// A failed operation stays queued and blocks later operations on the same
  /// record until the next flush; other records proceed. Losing the network
  /// or the session stops the flush.
  pub async fn flush(&self, key: &str) -> SyncResult<FlushReport> {
    if !self.inner.reachability.is_online() {
      return Err(SyncError::NetworkUnavailable);
    }
    let _guard = self.lock_key(key).await?;
    let queue = self.queue(key)?;

    let mut report = FlushReport::default();
    let mut blocked: HashSet<i64> = HashSet::new();

    for queued in queue.drain()? {
      // Earlier creates in this pass may have retargeted the operation
      let Some(op) = queue.get(queued.operation_id)? else {
        continue;
      };
      if blocked.contains(&op.target_id) {
        report.skipped += 1;
        continue;
      }

      match self.replay(key, &queue, &op).await {
        Ok(()) => report.replayed += 1,
        Err(err) if err.aborts_replay() => {
          warn!(
            collection = R::collection(),
            key,
            replayed = report.replayed,
            error = %err,
            "flush aborted"
          );
          return Err(err);
        }
        Err(err) => {
          warn!(
            collection = R::collection(),
            key,
            target_id = op.target_id,
            kind = ?op.kind,
            error = %err,
            "pending operation failed"
          );
          queue.record_failure(op.operation_id)?;
          blocked.insert(op.target_id);
          report.failed += 1;
        }
      }
    }

    report.remaining = queue.len();
    if report.replayed > 0 || report.failed > 0 {
      info!(
        collection = R::collection(),
        key,
        replayed = report.replayed,
        failed = report.failed,
        remaining = report.remaining,
        "pending queue flushed"
      );
    }
    self.inner.events.emit(SyncEvent::FlushCompleted {
      collection: R::collection(),
      key: key.to_string(),
      replayed: report.replayed,
      remaining: report.remaining,
    });
    Ok(report)
  }

  async fn replay(
    &self,
    key: &str,
    queue: &PendingQueue<R>,
    op: &PendingOperation<R>,
  ) -> SyncResult<()> {
    let remote = &self.inner.remote;
    match op.kind {
      OperationKind::Create => {
        let server = remote.create(key, &op.payload).await?;
        let server_id = server.id();
        queue.ack(op.operation_id)?;
        queue.retarget(op.target_id, server_id)?;
        self.remember_resolved(op.target_id, server_id)?;
        self.inner.cache.update(key, |items| {
          resolve_temp_id(items, op.target_id, server);
        })?;
        debug!(
          collection = R::collection(),
          key,
          temp_id = op.target_id,
          server_id,
          "temporary id resolved"
        );
        self.reapply_pending(key, queue, server_id)
      }
      OperationKind::Update => {
        let server = remote.update(key, &op.payload).await?;
        queue.ack(op.operation_id)?;
        self.inner.cache.update(key, |items| {
          accept_server_record(items, server);
        })?;
        self.reapply_pending(key, queue, op.target_id)
      }
      OperationKind::Delete => {
        match remote.delete(key, op.target_id).await {
          Ok(()) | Err(SyncError::Http(404)) => {}
          Err(err) => return Err(err),
        }
        queue.ack(op.operation_id)?;
        self.inner.cache.update(key, |items| {
          remove(items, op.target_id);
        })?;
        Ok(())
      }
    }
  }

  /// Put still-queued changes of `target_id` back on top of a server copy.
  fn reapply_pending(&self, key: &str, queue: &PendingQueue<R>, target_id: i64) -> SyncResult<()> {
    let pending: Vec<_> = queue
      .snapshot()?
      .into_iter()
      .filter(|o| o.target_id == target_id)
      .collect();
    if !pending.is_empty() {
      self
        .inner
        .cache
        .update(key, |items| overlay_pending(items, &pending))?;
    }
    Ok(())
  }

  /// Flush every key of this collection that has queued operations,
  /// including queues persisted before a restart.
  pub async fn flush_all(&self) -> SyncResult<FlushReport> {
    let prefix = PendingQueue::<R>::store_prefix();
    let mut keys: Vec<String> = self
      .inner
      .store
      .keys_with_prefix(&prefix)?
      .into_iter()
      .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
      .collect();
    for (key, queue) in lock(&self.inner.queues)?.iter() {
      if !queue.is_empty() && !keys.contains(key) {
        keys.push(key.clone());
      }
    }

    let mut total = FlushReport::default();
    for key in keys {
      let report = self.flush(&key).await?;
      total.replayed += report.replayed;
      total.failed += report.failed;
      total.skipped += report.skipped;
      total.remaining += report.remaining;
    }
    Ok(total)
  }

  /// Refresh `key` the next time connectivity comes back.
  pub fn mark_refresh_on_reconnect(&self, key: &str) -> SyncResult<()> {
    lock(&self.inner.refresh_on_reconnect)?.insert(key.to_string());
    Ok(())
  }

  /// Flush all queues, then refresh every key marked for reconnect. Keys
  /// that still can't be refreshed stay marked.
  pub async fn reconnect(&self) -> SyncResult<FlushReport> {
    let report = self.flush_all().await?;

    let keys: Vec<String> = lock(&self.inner.refresh_on_reconnect)?.drain().collect();
    for key in keys {
      if let Err(err) = self.refresh(&key).await {
        warn!(collection = R::collection(), key = %key, error = %err, "reconnect refresh failed");
        self.mark_refresh_on_reconnect(&key)?;
        if err.aborts_replay() {
          return Err(err);
        }
      }
    }
    Ok(report)
  }

  pub fn pending_count(&self, key: &str) -> SyncResult<usize> {
    Ok(self.queue(key)?.len())
  }

  pub fn pending(&self, key: &str) -> SyncResult<Vec<PendingOperation<R>>> {
    self.queue(key)?.snapshot()
  }

  /// Drop cached items and queued operations of every key (sign-out).
  pub fn clear_local(&self) -> SyncResult<()> {
    self.inner.cache.invalidate_all()?;
    let prefix = PendingQueue::<R>::store_prefix();
    for queue in lock(&self.inner.queues)?.values() {
      queue.clear()?;
    }
    self.inner.store.delete_where(&|k| k.starts_with(&prefix))?;
    lock(&self.inner.refresh_on_reconnect)?.clear();
    lock(&self.inner.resolved_ids)?.clear();
    Ok(())
  }
}
