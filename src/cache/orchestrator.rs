//! Cache orchestrator: binding registration and the read path.

use color_eyre::{
  eyre::{eyre, WrapErr},
  Result,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::binding::{self, CacheBinding};
use super::error::{CacheError, StoreOp};
use super::registry::KeyRegistry;
use super::traits::{CacheStore, Producer};
use crate::lifecycle::LifecycleSource;

/// Public entry point for declaring bindings and reading cached views.
///
/// The store is injected at construction. Every operation takes the entity
/// type's [`KeyRegistry`] explicitly, so one orchestrator can serve any
/// number of entity types.
pub struct CacheOrchestrator<S: CacheStore> {
  store: Arc<S>,
}

impl<S: CacheStore + 'static> CacheOrchestrator<S> {
  /// Create a new orchestrator owning the given store.
  pub fn new(store: S) -> Self {
    Self::from_shared(Arc::new(store))
  }

  /// Create a new orchestrator over a store shared with other owners.
  pub fn from_shared(store: Arc<S>) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  /// Bind every key of `registry` to `source`'s lifecycle hooks.
  ///
  /// Call once per entity type. Registering again installs duplicate hook
  /// pairs. Returns the number of bindings installed.
  pub fn register<L: LifecycleSource + ?Sized>(
    &self,
    registry: &KeyRegistry,
    source: &mut L,
  ) -> usize {
    for (key, producer) in registry.iter() {
      CacheBinding::new(Arc::clone(&self.store), key, Arc::clone(producer)).bind(source);
    }

    debug!(
      entity_type = registry.entity_type(),
      keys = registry.len(),
      "registered cache keys"
    );
    registry.len()
  }

  /// Read-through fetch.
  ///
  /// Returns the cached entry if present, otherwise regenerates it via
  /// [`force_fetch`](Self::force_fetch). Never returns `None` for a key
  /// managed by `registry`.
  pub fn withdraw(&self, registry: &KeyRegistry, key: &str) -> Result<Option<Value>> {
    let cached = self
      .store
      .get(key)
      .wrap_err_with(|| CacheError::store(StoreOp::Get, key))?;

    match cached {
      Some(value) => {
        debug!(key, "cache hit");
        Ok(Some(value))
      }
      None => {
        debug!(key, "cache miss");
        self.force_fetch(registry, key)
      }
    }
  }

  /// [`withdraw`](Self::withdraw) deserialized into `T`.
  pub fn withdraw_as<T: DeserializeOwned>(
    &self,
    registry: &KeyRegistry,
    key: &str,
  ) -> Result<Option<T>> {
    match self.withdraw(registry, key)? {
      Some(value) => serde_json::from_value(value)
        .map(Some)
        .map_err(|e| eyre!("Failed to deserialize cache key '{}': {}", key, e)),
      None => Ok(None),
    }
  }

  /// Fill a gap for a managed key.
  ///
  /// Returns `None` without touching the store when `key` is not in
  /// `registry`. An existing entry is returned as-is; the producer only runs
  /// when the store holds nothing for the key.
  pub fn force_fetch(&self, registry: &KeyRegistry, key: &str) -> Result<Option<Value>> {
    let Some(producer) = registry.get(key) else {
      debug!(
        entity_type = registry.entity_type(),
        key,
        "not a managed cache key"
      );
      return Ok(None);
    };

    self.fill_gap(key, producer).map(|(value, _)| Some(value))
  }

  /// Force-fetch every key of `registry`, filling only missing entries.
  ///
  /// Returns the number of keys that were regenerated.
  pub fn warm(&self, registry: &KeyRegistry) -> Result<usize> {
    let mut filled = 0;
    for (key, producer) in registry.iter() {
      if self.fill_gap(key, producer)?.1 {
        filled += 1;
      }
    }
    debug!(entity_type = registry.entity_type(), filled, "warmed cache");
    Ok(filled)
  }

  /// Existing entry for `key`, or a freshly regenerated one. The flag is set
  /// when the producer path was taken.
  fn fill_gap(&self, key: &str, producer: &Producer) -> Result<(Value, bool)> {
    let existing = self
      .store
      .get(key)
      .wrap_err_with(|| CacheError::store(StoreOp::Get, key))?;
    if let Some(value) = existing {
      return Ok((value, false));
    }

    debug!(key, "filling cache key");
    binding::regenerate(self.store.as_ref(), key, producer).map(|value| (value, true))
  }

  /// Drop every entry in the store.
  pub fn flush(&self) -> Result<()> {
    self
      .store
      .flush()
      .wrap_err_with(|| CacheError::store(StoreOp::Flush, "*"))
  }

  /// Orchestrator view bound to one entity type's registry.
  pub fn scoped(&self, registry: KeyRegistry) -> EntityCache<S> {
    EntityCache {
      cache: self.clone(),
      registry,
    }
  }
}

impl<S: CacheStore> Clone for CacheOrchestrator<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}

/// An orchestrator paired with the registry of the entity type holding it.
pub struct EntityCache<S: CacheStore> {
  cache: CacheOrchestrator<S>,
  registry: KeyRegistry,
}

impl<S: CacheStore + 'static> EntityCache<S> {
  pub fn registry(&self) -> &KeyRegistry {
    &self.registry
  }

  pub fn register<L: LifecycleSource + ?Sized>(&self, source: &mut L) -> usize {
    self.cache.register(&self.registry, source)
  }

  pub fn withdraw(&self, key: &str) -> Result<Option<Value>> {
    self.cache.withdraw(&self.registry, key)
  }

  pub fn withdraw_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    self.cache.withdraw_as(&self.registry, key)
  }

  pub fn force_fetch(&self, key: &str) -> Result<Option<Value>> {
    self.cache.force_fetch(&self.registry, key)
  }
}
