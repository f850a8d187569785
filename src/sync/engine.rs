//! Reconnect loop: replays queues and refreshes marked keys when the
//! network comes back.

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::collection::{Collection, RemoteCollection};
use crate::cache::Record;
use crate::reachability::{FlushDebounce, Reachability};

/// Something that wants to run when connectivity returns.
pub trait ReconnectHook: Send + Sync {
  fn name(&self) -> &'static str;

  fn on_reconnect(&self) -> BoxFuture<'_, ()>;
}

impl<R: Record, A: RemoteCollection<R>> ReconnectHook for Collection<R, A> {
  fn name(&self) -> &'static str {
    Collection::name(self)
  }

  fn on_reconnect(&self) -> BoxFuture<'_, ()> {
    async move {
      match self.reconnect().await {
        Ok(report) => debug!(collection = self.name(), ?report, "reconnect sync done"),
        Err(err) => warn!(collection = self.name(), error = %err, "reconnect sync failed"),
      }
    }
    .boxed()
  }
}

pub struct SyncEngine {
  reachability: Arc<Reachability>,
  debounce: FlushDebounce,
  hooks: Vec<Arc<dyn ReconnectHook>>,
}

impl SyncEngine {
  pub fn new(reachability: Arc<Reachability>, debounce: Duration) -> Self {
    Self {
      reachability,
      debounce: FlushDebounce::new(debounce),
      hooks: Vec::new(),
    }
  }

  pub fn register(&mut self, hook: Arc<dyn ReconnectHook>) {
    debug!(hook = hook.name(), "reconnect hook registered");
    self.hooks.push(hook);
  }

  /// Run every hook now, in registration order.
  pub async fn sync_now(&self) {
    for hook in &self.hooks {
      hook.on_reconnect().await;
    }
  }

  /// React to a reachability change at `now`. Returns whether a sync ran.
  pub async fn handle_transition(&self, online: bool, now: Instant) -> bool {
    if !online || !self.debounce.try_acquire(now) {
      return false;
    }
    info!(hooks = self.hooks.len(), "back online, syncing");
    self.sync_now().await;
    true
  }

  /// Follow reachability until `cancel` fires.
  ///
  /// A reconnect that lands inside the debounce window is not dropped: one
  /// sync is scheduled for when the window closes, and runs if the link is
  /// still up by then.
  pub async fn run(&self, cancel: CancellationToken) {
    let mut rx = self.reachability.subscribe();
    let mut was_online = *rx.borrow_and_update();
    let mut deferred: Option<Instant> = None;

    loop {
      let wait_for_slot = async move {
        match deferred {
          Some(at) => tokio::time::sleep_until(at.into()).await,
          None => std::future::pending().await,
        }
      };

      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = wait_for_slot => {
          deferred = None;
          if self.reachability.is_online() {
            debug!("debounce window closed, running deferred sync");
            if !self.handle_transition(true, Instant::now()).await {
              deferred = self.debounce.next_slot();
            }
          }
        }
        changed = rx.changed() => {
          if changed.is_err() {
            break;
          }
          let online = *rx.borrow_and_update();
          if !online {
            deferred = None;
          } else if !was_online && !self.handle_transition(online, Instant::now()).await {
            deferred = self.debounce.next_slot();
            debug!(?deferred, "reconnect sync deferred");
          }
          was_online = online;
        }
      }
    }
    debug!("sync engine stopped");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::EventBus;
  use crate::store::{MemoryStore, PersistentStore};
  use crate::sync::{CollectionOptions, TempIdAllocator};
  use crate::testing::{FakeRemote, Item};
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Default)]
  struct Counter(AtomicUsize);

  impl ReconnectHook for Counter {
    fn name(&self) -> &'static str {
      "counter"
    }

    fn on_reconnect(&self) -> BoxFuture<'_, ()> {
      self.0.fetch_add(1, Ordering::SeqCst);
      async {}.boxed()
    }
  }

  fn engine(online: bool) -> (SyncEngine, Arc<Counter>, Arc<Reachability>) {
    let reachability = Arc::new(Reachability::new(online, EventBus::default()));
    let counter = Arc::new(Counter::default());
    let mut engine = SyncEngine::new(reachability.clone(), Duration::from_secs(5));
    engine.register(counter.clone());
    (engine, counter, reachability)
  }

  #[tokio::test]
  async fn test_flapping_is_debounced() {
    let (engine, counter, _) = engine(false);
    let t0 = Instant::now();

    assert!(engine.handle_transition(true, t0).await);
    assert!(!engine.handle_transition(false, t0 + Duration::from_secs(1)).await);
    assert!(!engine.handle_transition(true, t0 + Duration::from_secs(2)).await);
    assert!(engine.handle_transition(true, t0 + Duration::from_secs(6)).await);

    assert_eq!(counter.0.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_run_syncs_on_reconnect_until_cancelled() {
    let (engine, counter, reachability) = engine(false);
    let engine = Arc::new(engine);
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
      let engine = engine.clone();
      let cancel = cancel.clone();
      async move { engine.run(cancel).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    reachability.set_online(true);
    for _ in 0..50 {
      if counter.0.load(Ordering::SeqCst) == 1 {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);

    cancel.cancel();
    task.await.unwrap();
  }

  #[tokio::test]
  async fn test_reconnect_inside_debounce_window_syncs_when_window_closes() {
    let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
    let events = EventBus::default();
    let reachability = Arc::new(Reachability::new(false, events.clone()));
    let remote = Arc::new(FakeRemote::new(57));
    let items = Collection::<Item, _>::new(
      remote.clone(),
      store.clone(),
      Arc::new(TempIdAllocator::load(store).unwrap()),
      reachability.clone(),
      events,
      CollectionOptions::default(),
    );
    let mut engine = SyncEngine::new(reachability.clone(), Duration::from_millis(500));
    engine.register(Arc::new(items.clone()));
    let engine = Arc::new(engine);
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
      let engine = engine.clone();
      let cancel = cancel.clone();
      async move { engine.run(cancel).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    reachability.set_online(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    reachability.set_online(false);
    items.create("trip-1", Item::new(0, "Sunscreen")).await.unwrap();
    reachability.set_online(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(items.pending_count("trip-1").unwrap(), 1);

    for _ in 0..150 {
      if items.pending_count("trip-1").unwrap() == 0 {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(items.pending_count("trip-1").unwrap(), 0);
    assert_eq!(remote.records()[0].id, 57);
    cancel.cancel();
    task.await.unwrap();
  }

  #[tokio::test]
  async fn test_deferred_sync_dropped_when_link_goes_down() {
    let reachability = Arc::new(Reachability::new(false, EventBus::default()));
    let counter = Arc::new(Counter::default());
    let mut engine = SyncEngine::new(reachability.clone(), Duration::from_millis(200));
    engine.register(counter.clone());
    let engine = Arc::new(engine);
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
      let engine = engine.clone();
      let cancel = cancel.clone();
      async move { engine.run(cancel).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    reachability.set_online(true);
    tokio::time::sleep(Duration::from_millis(20)).await;
    reachability.set_online(false);
    tokio::time::sleep(Duration::from_millis(20)).await;
    reachability.set_online(true);
    tokio::time::sleep(Duration::from_millis(20)).await;
    reachability.set_online(false);
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    cancel.cancel();
    task.await.unwrap();
  }

  #[tokio::test]
  async fn test_reconnect_flushes_registered_collection() {
    let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
    let events = EventBus::default();
    let reachability = Arc::new(Reachability::new(false, events.clone()));
    let remote = Arc::new(FakeRemote::new(57));
    let items = Collection::<Item, _>::new(
      remote.clone(),
      store.clone(),
      Arc::new(TempIdAllocator::load(store).unwrap()),
      reachability.clone(),
      events,
      CollectionOptions::default(),
    );
    items.create("trip-1", Item::new(0, "Sunscreen")).await.unwrap();

    let mut engine = SyncEngine::new(reachability.clone(), Duration::from_secs(5));
    engine.register(Arc::new(items.clone()));
    reachability.set_online(true);
    assert!(engine.handle_transition(true, Instant::now()).await);

    assert_eq!(items.pending_count("trip-1").unwrap(), 0);
    assert_eq!(remote.records()[0].id, 57);
  }
}
