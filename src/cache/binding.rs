//! Binding of one cache key to an entity type's lifecycle hooks.

use color_eyre::{eyre::WrapErr, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{CacheError, StoreOp};
use super::traits::{CacheStore, Producer};
use crate::lifecycle::{LifecycleEvent, LifecycleSource};

/// A (key, producer) pair wired to a store.
///
/// Once bound to a [`LifecycleSource`], every save or delete forgets the key
/// before the write and regenerates it eagerly after the write commits. The
/// key is therefore either absent or fresh as of the last mutation; it is
/// never marked stale in place.
pub struct CacheBinding<S: CacheStore> {
  key: String,
  producer: Producer,
  store: Arc<S>,
}

impl<S: CacheStore + 'static> CacheBinding<S> {
  pub fn new(store: Arc<S>, key: impl Into<String>, producer: Producer) -> Self {
    Self {
      key: key.into(),
      producer,
      store,
    }
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  /// Install the invalidate/regenerate hook pairs on `source`.
  ///
  /// Binding the same key twice installs a second pair; nothing is deduplicated.
  pub fn bind<L: LifecycleSource + ?Sized>(self, source: &mut L) {
    let entity_type = source.entity_type();
    let binding = Arc::new(self);

    for event in LifecycleEvent::ALL {
      let binding = Arc::clone(&binding);
      if event.is_before() {
        source.on(event, Box::new(move || binding.invalidate()));
      } else {
        source.on(event, Box::new(move || binding.regenerate().map(|_| ())));
      }
    }

    debug!(entity_type, key = %binding.key, "cache key bound to lifecycle hooks");
  }

  /// Remove the key's entry ahead of a mutation.
  pub fn invalidate(&self) -> Result<()> {
    debug!(key = %self.key, "invalidating cache key");
    self
      .store
      .forget(&self.key)
      .wrap_err_with(|| CacheError::store(StoreOp::Forget, &self.key))
  }

  /// Recompute and store the key's entry after a mutation.
  pub fn regenerate(&self) -> Result<Value> {
    info!(key = %self.key, "regenerating cache key");
    regenerate(self.store.as_ref(), &self.key, &self.producer)
  }
}

/// Fill `key` through `store.get_or_set_forever`.
///
/// Producer failures are tagged [`CacheError::ProducerFailed`]. Every other
/// failure in this path counts as a store failure and is tagged
/// [`StoreOp::Store`], including a failed read inside `get_or_set_forever`.
pub(crate) fn regenerate<S: CacheStore + ?Sized>(
  store: &S,
  key: &str,
  producer: &Producer,
) -> Result<Value> {
  let produce = || -> Result<Value> {
    producer().wrap_err_with(|| CacheError::ProducerFailed {
      key: key.to_string(),
    })
  };

  store.get_or_set_forever(key, &produce).map_err(|e| {
    if CacheError::of(&e).is_some() {
      e
    } else {
      e.wrap_err(CacheError::store(StoreOp::Store, key))
    }
  })
}
