//! Online/offline tracking.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::event::{EventBus, SyncEvent};

/// Tracks whether the network is reachable and broadcasts transitions.
pub struct Reachability {
  tx: watch::Sender<bool>,
  events: EventBus,
}

impl Reachability {
  pub fn new(online: bool, events: EventBus) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx, events }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Report the current state. Only real transitions are broadcast.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });

    if changed {
      info!(online, "connectivity changed");
      self.events.emit(SyncEvent::Connectivity { online });
    }
  }

  /// Stream of state changes; the receiver starts at the current value.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Minimum spacing between reconnect flushes so a flapping link does not
/// replay the queue on every bounce.
pub struct FlushDebounce {
  min_interval: Duration,
  last_flush: Mutex<Option<Instant>>,
}

impl FlushDebounce {
  pub fn new(min_interval: Duration) -> Self {
    Self {
      min_interval,
      last_flush: Mutex::new(None),
    }
  }

  /// Claim a flush slot at `now`. Returns false if the previous flush was
  /// less than `min_interval` ago.
  pub fn try_acquire(&self, now: Instant) -> bool {
    let mut last = match self.last_flush.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };

    match *last {
      Some(prev) if now.saturating_duration_since(prev) < self.min_interval => {
        debug!(
          since_last_ms = now.saturating_duration_since(prev).as_millis() as u64,
          "reconnect flush debounced"
        );
        false
      }
      _ => {
        *last = Some(now);
        true
      }
    }
  }

  /// Earliest instant the next flush may run, or `None` if none has run yet.
  pub fn next_slot(&self) -> Option<Instant> {
    let last = match self.last_flush.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    last.map(|prev| prev + self.min_interval)
  }
}
