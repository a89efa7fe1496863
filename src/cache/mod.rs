//! Local snapshot cache for offline reads.
//!
//! This module keeps the last good answer for each logical query:
//! - One snapshot per key, overwritten on every successful fetch
//! - Served unmodified when the backend is unreachable
//! - Never expires on its own

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{NoopStorage, SnapshotStorage, SqliteStorage};
pub use traits::{CacheKey, CacheResult, CacheSource, CachedSnapshot};
