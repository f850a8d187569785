//! Offline-first sync core for a trip-planning client.
//!
//! Collections serve reads from a RAM + persistent cache, apply writes
//! optimistically, queue writes made while offline and replay them when the
//! network returns. All requests share one session and one token refresh.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod logging;
pub mod net;
pub mod reachability;
pub mod session;
pub mod store;
pub mod sync;
pub mod trips;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{SyncContext, SyncSettings};
pub use error::{SyncError, SyncResult};
pub use event::{EventBus, SyncEvent};
