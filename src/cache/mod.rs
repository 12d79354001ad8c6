//! Read-through, write-invalidate caching layer.
//!
//! This module binds named cached views to entity lifecycle hooks:
//! - Each key is forgotten before a save or delete and regenerated after it
//! - Reads fall back to the key's producer on a miss
//! - Stores are pluggable (memory, SQLite, or disabled)

mod binding;
mod error;
mod orchestrator;
mod registry;
mod storage;
#[cfg(test)]
pub(crate) mod testing;
mod traits;

pub use binding::CacheBinding;
pub use error::{CacheError, StoreOp};
pub use orchestrator::{CacheOrchestrator, EntityCache};
pub use registry::{KeyRegistry, KeyRegistryBuilder};
pub use storage::{CachedEntry, MemoryStore, NoopStore, SqliteStore, StoreBackend};
pub use traits::{CacheStore, Producer};
