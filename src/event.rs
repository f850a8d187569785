use tokio::sync::broadcast;

/// Sync-core events for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
  /// Credentials could not be refreshed; prompt for sign-in.
  AuthExpired,
  /// Reachability changed.
  Connectivity { online: bool },
  /// A pending queue was replayed.
  FlushCompleted {
    collection: &'static str,
    key: String,
    replayed: usize,
    remaining: usize,
  },
  /// Non-blocking notice: cached data is being shown because a refresh failed.
  Notice(String),
}

/// Fan-out channel for [`SyncEvent`]s. Emitting never blocks and never fails
/// when nobody is listening.
#[derive(Clone)]
pub struct EventBus {
  tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
  pub fn new(capacity: usize) -> Self {
    let (tx, _rx) = broadcast::channel(capacity);
    Self { tx }
  }

  pub fn emit(&self, event: SyncEvent) {
    // No receivers is fine
    let _ = self.tx.send(event);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.tx.subscribe()
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new(64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_subscribers_receive_emitted_events() {
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    bus.emit(SyncEvent::AuthExpired);
    assert_eq!(rx.recv().await.unwrap(), SyncEvent::AuthExpired);
  }

  #[test]
  fn test_emit_without_subscribers() {
    let bus = EventBus::default();
    bus.emit(SyncEvent::Connectivity { online: false });
  }
}
