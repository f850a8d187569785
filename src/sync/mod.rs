//! Offline mutation machinery: temporary ids, the pending operation queue,
//! reconciliation, the per-record-type collection and the reconnect engine.

mod collection;
mod engine;
mod ids;
mod queue;
pub mod reconcile;

pub use collection::{Collection, CollectionOptions, FlushReport, RemoteCollection};
pub use engine::{ReconnectHook, SyncEngine};
pub use ids::TempIdAllocator;
pub use queue::{EnqueueOutcome, OperationKind, PendingOperation, PendingQueue};
