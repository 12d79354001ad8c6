//! Per-entity-type mapping from cache key to producer.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::traits::Producer;

/// Named cached views declared by one entity type.
///
/// Built once with [`KeyRegistry::builder`] and immutable afterwards. Clones
/// share the same underlying map.
#[derive(Clone)]
pub struct KeyRegistry {
  entity_type: &'static str,
  producers: Arc<BTreeMap<String, Producer>>,
}

impl KeyRegistry {
  pub fn builder(entity_type: &'static str) -> KeyRegistryBuilder {
    KeyRegistryBuilder {
      entity_type,
      producers: BTreeMap::new(),
    }
  }

  pub fn entity_type(&self) -> &'static str {
    self.entity_type
  }

  /// Producer bound to `key`, if the key is managed by this registry.
  pub fn get(&self, key: &str) -> Option<&Producer> {
    self.producers.get(key)
  }

  pub fn contains(&self, key: &str) -> bool {
    self.producers.contains_key(key)
  }

  /// Managed keys in sorted order.
  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.producers.keys().map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Producer)> {
    self.producers.iter().map(|(k, p)| (k.as_str(), p))
  }

  pub fn len(&self) -> usize {
    self.producers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.producers.is_empty()
  }
}

impl fmt::Debug for KeyRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KeyRegistry")
      .field("entity_type", &self.entity_type)
      .field("keys", &self.producers.keys().collect::<Vec<_>>())
      .finish()
  }
}

pub struct KeyRegistryBuilder {
  entity_type: &'static str,
  producers: BTreeMap<String, Producer>,
}

impl KeyRegistryBuilder {
  /// Declare a cached view. The producer's output is serialized to JSON on
  /// every invocation. Declaring the same key twice keeps the last producer.
  pub fn key<K, F, T>(mut self, key: K, producer: F) -> Self
  where
    K: Into<String>,
    F: Fn() -> Result<T> + Send + Sync + 'static,
    T: Serialize,
  {
    let key = key.into();
    let name = key.clone();
    let producer: Producer = Arc::new(move || {
      let value = producer()?;
      serde_json::to_value(value)
        .map_err(|e| eyre!("Failed to serialize value for cache key '{}': {}", name, e))
    });

    self.producers.insert(key, producer);
    self
  }

  pub fn build(self) -> KeyRegistry {
    KeyRegistry {
      entity_type: self.entity_type,
      producers: Arc::new(self.producers),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_builder_registers_keys() {
    let registry = KeyRegistry::builder("post")
      .key("select_posts", || {
        Ok(BTreeMap::from([(1, "Title".to_string())]))
      })
      .key("all_posts", || Ok(vec!["Title"]))
      .build();

    assert_eq!(registry.entity_type(), "post");
    assert_eq!(registry.len(), 2);
    assert!(registry.contains("all_posts"));
    assert!(!registry.contains("unregistered_key"));
    assert_eq!(
      registry.keys().collect::<Vec<_>>(),
      vec!["all_posts", "select_posts"]
    );
  }

  #[test]
  fn test_producer_output_is_serialized() {
    let registry = KeyRegistry::builder("post")
      .key("select_posts", || {
        Ok(BTreeMap::from([(1, "Title".to_string()), (2, "Other".to_string())]))
      })
      .build();

    let producer = registry.get("select_posts").unwrap();
    assert_eq!(producer().unwrap(), json!({"1": "Title", "2": "Other"}));
  }

  #[test]
  fn test_last_declaration_wins() {
    let registry = KeyRegistry::builder("post")
      .key("all_posts", || Ok(1))
      .key("all_posts", || Ok(2))
      .build();

    assert_eq!(registry.len(), 1);
    assert_eq!((registry.get("all_posts").unwrap())().unwrap(), json!(2));
  }

  #[test]
  fn test_clones_share_producers() {
    let registry = KeyRegistry::builder("post").key("k", || Ok("v")).build();
    let clone = registry.clone();

    assert!(Arc::ptr_eq(registry.get("k").unwrap(), clone.get("k").unwrap()));
    assert!(KeyRegistry::builder("empty").build().is_empty());
  }
}
