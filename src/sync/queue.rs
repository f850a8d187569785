//! Durable log of mutations waiting for the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::cache::{is_temporary_id, Record};
use crate::error::SyncResult;
use crate::store::{PersistentStore, StoreError, StoreExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
  Create,
  Update,
  Delete,
}

/// One queued mutation with a snapshot of the record it carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation<R> {
  pub operation_id: Uuid,
  /// Temporary or server id of the record
  pub target_id: i64,
  pub kind: OperationKind,
  pub payload: R,
  pub enqueued_at: DateTime<Utc>,
  /// Failed replay attempts so far
  #[serde(default)]
  pub attempts: u32,
}

impl<R: Record> PendingOperation<R> {
  pub fn new(kind: OperationKind, payload: R) -> Self {
    Self {
      operation_id: Uuid::new_v4(),
      target_id: payload.id(),
      kind,
      payload,
      enqueued_at: Utc::now(),
      attempts: 0,
    }
  }
}

/// What `enqueue` did with an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
  /// Appended to the log
  Queued(Uuid),
  /// Folded into a pending create of the same record
  Coalesced(Uuid),
  /// Cancelled a create that never reached the server; nothing is queued
  Cancelled,
}

/// FIFO queue of pending operations for one collection key, persisted after
/// every change under `pending:<collection>:<key>`.
pub struct PendingQueue<R: Record> {
  store: Arc<dyn PersistentStore>,
  store_key: String,
  ops: Mutex<Vec<PendingOperation<R>>>,
}

impl<R: Record> PendingQueue<R> {
  pub fn store_prefix() -> String {
    format!("pending:{}:", R::collection())
  }

  /// Restore the queue for `key` from the store.
  pub fn load(store: Arc<dyn PersistentStore>, key: &str) -> SyncResult<Self> {
    let store_key = format!("{}{}", Self::store_prefix(), key);
    let ops: Vec<PendingOperation<R>> = store.get_json(&store_key)?.unwrap_or_default();
    if !ops.is_empty() {
      debug!(
        collection = R::collection(),
        key,
        pending = ops.len(),
        "pending operations restored"
      );
    }
    Ok(Self {
      store,
      store_key,
      ops: Mutex::new(ops),
    })
  }

  fn ops(&self) -> Result<MutexGuard<'_, Vec<PendingOperation<R>>>, StoreError> {
    self.ops.lock().map_err(|_| StoreError::LockPoisoned)
  }

  fn persist(&self, ops: &[PendingOperation<R>]) -> SyncResult<()> {
    if ops.is_empty() {
      self.store.delete(&self.store_key)?;
    } else {
      self.store.set_json(&self.store_key, ops)?;
    }
    Ok(())
  }

  /// Append `op`, folding it into a pending create of the same temporary
  /// record where possible.
  pub fn enqueue(&self, op: PendingOperation<R>) -> SyncResult<EnqueueOutcome> {
    let mut ops = self.ops()?;
    let pending_create = ops
      .iter()
      .position(|o| o.target_id == op.target_id && o.kind == OperationKind::Create);

    let outcome = match (op.kind, pending_create) {
      (OperationKind::Update, Some(idx)) if is_temporary_id(op.target_id) => {
        ops[idx].payload = op.payload;
        EnqueueOutcome::Coalesced(ops[idx].operation_id)
      }
      (OperationKind::Delete, Some(_)) if is_temporary_id(op.target_id) => {
        ops.retain(|o| o.target_id != op.target_id);
        EnqueueOutcome::Cancelled
      }
      _ => {
        let id = op.operation_id;
        ops.push(op);
        EnqueueOutcome::Queued(id)
      }
    };

    self.persist(&ops)?;
    Ok(outcome)
  }

  /// Snapshot of the log in enqueue order. Finite; operations stay queued
  /// until acked, so a later drain starts over from whatever is left.
  pub fn drain(&self) -> SyncResult<std::vec::IntoIter<PendingOperation<R>>> {
    Ok(self.snapshot()?.into_iter())
  }

  pub fn snapshot(&self) -> SyncResult<Vec<PendingOperation<R>>> {
    Ok(self.ops()?.clone())
  }

  /// Current state of one operation (target ids may have been rewritten).
  pub fn get(&self, operation_id: Uuid) -> SyncResult<Option<PendingOperation<R>>> {
    Ok(
      self
        .ops()?
        .iter()
        .find(|o| o.operation_id == operation_id)
        .cloned(),
    )
  }

  /// Remove an acknowledged operation. Returns false if it was not queued.
  pub fn ack(&self, operation_id: Uuid) -> SyncResult<bool> {
    let mut ops = self.ops()?;
    let before = ops.len();
    ops.retain(|o| o.operation_id != operation_id);
    let removed = ops.len() != before;
    if removed {
      self.persist(&ops)?;
    }
    Ok(removed)
  }

  pub fn record_failure(&self, operation_id: Uuid) -> SyncResult<()> {
    let mut ops = self.ops()?;
    if let Some(op) = ops.iter_mut().find(|o| o.operation_id == operation_id) {
      op.attempts += 1;
      self.persist(&ops)?;
    }
    Ok(())
  }

  /// Point every operation for `from` at `to` once the server has assigned a
  /// real id.
  pub fn retarget(&self, from: i64, to: i64) -> SyncResult<usize> {
    let mut ops = self.ops()?;
    let mut changed = 0;
    for op in ops.iter_mut().filter(|o| o.target_id == from) {
      op.target_id = to;
      op.payload.set_id(to);
      changed += 1;
    }
    if changed > 0 {
      self.persist(&ops)?;
    }
    Ok(changed)
  }

  pub fn has_pending_for(&self, target_id: i64) -> SyncResult<bool> {
    Ok(self.ops()?.iter().any(|o| o.target_id == target_id))
  }

  pub fn len(&self) -> usize {
    self.ops().map(|ops| ops.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn clear(&self) -> SyncResult<()> {
    let mut ops = self.ops()?;
    ops.clear();
    self.persist(&ops)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use crate::testing::Item;

  fn queue() -> (PendingQueue<Item>, Arc<dyn PersistentStore>) {
    let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
    (PendingQueue::load(store.clone(), "trip-1").unwrap(), store)
  }

  #[test]
  fn test_fifo_order_and_ack() {
    let (queue, _) = queue();
    let first = PendingOperation::new(OperationKind::Update, Item::new(1, "a"));
    let second = PendingOperation::new(OperationKind::Delete, Item::new(2, "b"));
    let first_id = first.operation_id;
    queue.enqueue(first).unwrap();
    queue.enqueue(second).unwrap();

    let order: Vec<i64> = queue.drain().unwrap().map(|o| o.target_id).collect();
    assert_eq!(order, vec![1, 2]);

    assert!(queue.ack(first_id).unwrap());
    assert!(!queue.ack(first_id).unwrap());
    assert_eq!(queue.len(), 1);
  }

  #[test]
  fn test_queue_survives_restart() {
    let (queue, store) = queue();
    queue
      .enqueue(PendingOperation::new(
        OperationKind::Create,
        Item::new(-1, "Sunscreen"),
      ))
      .unwrap();

    let restored = PendingQueue::<Item>::load(store, "trip-1").unwrap();
    let ops = restored.snapshot().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].kind, OperationKind::Create);
    assert_eq!(ops[0].payload.name, "Sunscreen");
  }

  #[test]
  fn test_empty_queue_is_not_persisted() {
    let (queue, store) = queue();
    let op = PendingOperation::new(OperationKind::Update, Item::new(3, "x"));
    let id = op.operation_id;
    queue.enqueue(op).unwrap();
    assert_eq!(store.keys_with_prefix("pending:item:").unwrap().len(), 1);

    queue.ack(id).unwrap();
    assert!(store.keys_with_prefix("pending:item:").unwrap().is_empty());
  }

  #[test]
  fn test_update_of_unsent_create_is_coalesced() {
    let (queue, _) = queue();
    let create = PendingOperation::new(OperationKind::Create, Item::new(-1, "Sunscreen"));
    let create_id = create.operation_id;
    queue.enqueue(create).unwrap();

    let mut edited = Item::new(-1, "Sunscreen SPF50");
    edited.quantity = 2;
    let outcome = queue
      .enqueue(PendingOperation::new(OperationKind::Update, edited))
      .unwrap();

    assert_eq!(outcome, EnqueueOutcome::Coalesced(create_id));
    let ops = queue.snapshot().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].payload.name, "Sunscreen SPF50");
    assert_eq!(ops[0].payload.quantity, 2);
  }

  #[test]
  fn test_delete_of_unsent_create_cancels_both() {
    let (queue, _) = queue();
    queue
      .enqueue(PendingOperation::new(OperationKind::Create, Item::new(-4, "Hat")))
      .unwrap();
    queue
      .enqueue(PendingOperation::new(OperationKind::Update, Item::new(9, "Map")))
      .unwrap();

    let outcome = queue
      .enqueue(PendingOperation::new(OperationKind::Delete, Item::new(-4, "Hat")))
      .unwrap();

    assert_eq!(outcome, EnqueueOutcome::Cancelled);
    let ops = queue.snapshot().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].target_id, 9);
  }

  #[test]
  fn test_retarget_rewrites_ids() {
    let (queue, _) = queue();
    queue
      .enqueue(PendingOperation::new(OperationKind::Create, Item::new(-1, "a")))
      .unwrap();
    queue
      .enqueue(PendingOperation::new(OperationKind::Update, Item::new(5, "b")))
      .unwrap();

    assert_eq!(queue.retarget(-1, 57).unwrap(), 1);
    let ops = queue.snapshot().unwrap();
    assert_eq!(ops[0].target_id, 57);
    assert_eq!(ops[0].payload.id, 57);
    assert!(queue.has_pending_for(57).unwrap());
    assert!(!queue.has_pending_for(-1).unwrap());
  }

  #[test]
  fn test_record_failure_keeps_operation() {
    let (queue, _) = queue();
    let op = PendingOperation::new(OperationKind::Update, Item::new(1, "a"));
    let id = op.operation_id;
    queue.enqueue(op).unwrap();

    queue.record_failure(id).unwrap();
    queue.record_failure(id).unwrap();

    assert_eq!(queue.get(id).unwrap().unwrap().attempts, 2);
  }
}
