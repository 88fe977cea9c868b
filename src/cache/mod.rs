//! Versioned response cache for offline support.
//!
//! This module provides the storage side of the offline controller:
//! - Named stores, one per cache version, mapping request identity to a response
//! - Whole-store deletion as the only eviction mechanism
//! - Network-first and cache-first strategies over a single store

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, CachedResponse, SqliteStorage};
pub use traits::{CacheResult, CacheSource};
