//! Reconciliation of cached collections with server state.
//!
//! The server is authoritative for which records exist; the local copy wins
//! only for records the server hasn't seen yet (temporary ids) and for fields
//! that never travel over the wire.

use std::collections::{HashMap, HashSet};

use super::queue::{OperationKind, PendingOperation};
use crate::cache::{is_temporary_id, Record};

/// Merge a freshly fetched collection into the cached one.
///
/// - records only in `current` are dropped, unless they carry a temporary id
/// - records in both are replaced by the fetched copy when `updated_at`
///   differs (or is missing on either side), carrying local-only fields
/// - records only in `fetched` are appended in fetched order
///
/// Idempotent: merging the same `fetched` twice gives the same result.
pub fn merge<R: Record>(current: &[R], fetched: &[R]) -> Vec<R> {
  let fetched_by_id: HashMap<i64, &R> = fetched.iter().map(|r| (r.id(), r)).collect();
  let mut seen: HashSet<i64> = HashSet::with_capacity(current.len() + fetched.len());
  let mut merged = Vec::with_capacity(fetched.len());

  for local in current {
    if !seen.insert(local.id()) {
      continue;
    }
    match fetched_by_id.get(&local.id()) {
      Some(remote) if needs_replace(local, *remote) => {
        let mut replacement = (*remote).clone();
        replacement.carry_local_fields(local);
        merged.push(replacement);
      }
      Some(_) => merged.push(local.clone()),
      None if is_temporary_id(local.id()) => merged.push(local.clone()),
      None => {}
    }
  }

  for remote in fetched {
    if seen.insert(remote.id()) {
      merged.push(remote.clone());
    }
  }

  merged
}

fn needs_replace<R: Record>(local: &R, remote: &R) -> bool {
  match (local.updated_at(), remote.updated_at()) {
    (Some(a), Some(b)) => a != b,
    _ => true,
  }
}

/// Swap the temporary entry for the server-assigned record, in place.
///
/// Local-only fields of the temporary entry are carried over. If the server
/// record is already present (e.g. a refresh raced the ack) the temporary
/// entry is dropped instead of duplicated.
pub fn resolve_temp_id<R: Record>(items: &mut Vec<R>, temp_id: i64, mut server: R) {
  let temp_pos = items.iter().position(|r| r.id() == temp_id);
  let server_pos = items.iter().position(|r| r.id() == server.id());

  match (temp_pos, server_pos) {
    (Some(t), None) => {
      server.carry_local_fields(&items[t]);
      items[t] = server;
    }
    (Some(t), Some(s)) => {
      server.carry_local_fields(&items[t]);
      items[s] = server;
      items.remove(t);
    }
    (None, Some(s)) => {
      server.carry_local_fields(&items[s]);
      items[s] = server;
    }
    (None, None) => items.push(server),
  }
}

/// Re-apply queued mutations on top of a merged list so a refresh never
/// reverts edits the server hasn't received yet.
pub fn overlay_pending<R: Record>(items: &mut Vec<R>, ops: &[PendingOperation<R>]) {
  for op in ops {
    match op.kind {
      OperationKind::Create | OperationKind::Update => {
        let mut record = op.payload.clone();
        if let Some(existing) = items.iter().find(|r| r.id() == op.target_id) {
          record.carry_local_fields(existing);
        }
        upsert(items, record);
      }
      OperationKind::Delete => {
        remove(items, op.target_id);
      }
    }
  }
}

/// Replace the record with the same id, or append it. Returns the replaced
/// record.
pub fn upsert<R: Record>(items: &mut Vec<R>, record: R) -> Option<R> {
  match items.iter().position(|r| r.id() == record.id()) {
    Some(pos) => Some(std::mem::replace(&mut items[pos], record)),
    None => {
      items.push(record);
      None
    }
  }
}

/// Replace with a server copy, keeping local-only fields of the cached one.
pub fn accept_server_record<R: Record>(items: &mut Vec<R>, mut record: R) -> R {
  if let Some(existing) = items.iter().find(|r| r.id() == record.id()) {
    record.carry_local_fields(existing);
  }
  upsert(items, record.clone());
  record
}

/// Remove the record with `id`, returning its position and value.
pub fn remove<R: Record>(items: &mut Vec<R>, id: i64) -> Option<(usize, R)> {
  let pos = items.iter().position(|r| r.id() == id)?;
  Some((pos, items.remove(pos)))
}

/// Put a removed record back where it was.
pub fn restore<R: Record>(items: &mut Vec<R>, position: usize, record: R) {
  if items.iter().any(|r| r.id() == record.id()) {
    return;
  }
  let position = position.min(items.len());
  items.insert(position, record);
}
