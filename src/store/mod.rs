//! Durable storage collaborator.
//!
//! The sync core persists cache entries, pending queues, the session and the
//! temporary id counter through [`PersistentStore`]. Two backends ship with
//! the crate: SQLite for real use and an in-memory map for tests.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{PersistentStore, StoreError, StoreExt};
