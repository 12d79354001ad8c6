//! Read-through, write-invalidate caching bound to entity lifecycle hooks.
//!
//! An entity type declares a [`KeyRegistry`] of named cached views. Registering
//! it with a [`CacheOrchestrator`] wires every key to the entity's
//! [`LifecycleSource`]: the key is forgotten before each save or delete and
//! regenerated right after it commits. Reads go through
//! [`CacheOrchestrator::withdraw`], which regenerates on a miss.

pub mod cache;
pub mod config;
pub mod db;
pub mod lifecycle;
pub mod logging;

pub use cache::{
  CacheBinding, CacheError, CacheOrchestrator, CacheStore, EntityCache, KeyRegistry, MemoryStore,
  NoopStore, Producer, SqliteStore, StoreBackend,
};
pub use lifecycle::{Hook, Hooks, LifecycleEvent, LifecycleSource};
