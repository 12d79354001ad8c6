//! Core traits and types for the caching system.

use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;

/// Zero-argument derivation that materializes the current value for a key.
///
/// Producers are re-invoked on every regeneration and must reflect the current
/// state of whatever they read.
pub type Producer = Arc<dyn Fn() -> Result<Value> + Send + Sync>;

/// Key-value cache backend.
///
/// Entries never expire. Each operation is treated as an atomic primitive by
/// the layers above; implementations do their own locking.
pub trait CacheStore: Send + Sync {
  /// Get the current entry for a key, if any.
  fn get(&self, key: &str) -> Result<Option<Value>>;

  /// Remove the entry for a key. Forgetting an absent key is not an error.
  fn forget(&self, key: &str) -> Result<()>;

  /// Return the entry for a key, or invoke `producer`, store its output
  /// forever and return it.
  ///
  /// A producer error is returned unchanged and nothing is stored.
  fn get_or_set_forever(&self, key: &str, producer: &dyn Fn() -> Result<Value>) -> Result<Value>;

  /// Remove every entry.
  fn flush(&self) -> Result<()>;
}
