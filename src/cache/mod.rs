//! Generic caching layer for data persistence and offline support.
//!
//! This module provides a domain-agnostic cache that:
//! - Keeps one entry (ordered, id-unique items) per collection key
//! - Serves reads from RAM, falling back to the persistent store
//! - Tracks freshness with a TTL against the last network fetch
//! - Distinguishes network writes from optimistic local writes

mod layer;
mod traits;

pub use layer::{CacheEntry, TieredCache, WriteOrigin};
pub use traits::{is_temporary_id, CacheResult, CacheSource, Record};
