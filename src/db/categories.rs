//! Categories posts may belong to.

use chrono::{DateTime, Utc};
use color_eyre::{
  eyre::{eyre, WrapErr},
  Result,
};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{serialize_time, time_column, to_sql_time, Database};
use crate::cache::KeyRegistry;
use crate::lifecycle::{Hook, Hooks, LifecycleEvent, LifecycleSource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
  pub id: i64,
  pub name: String,
  #[serde(serialize_with = "serialize_time")]
  pub created_at: DateTime<Utc>,
  #[serde(serialize_with = "serialize_time")]
  pub updated_at: DateTime<Utc>,
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
  Ok(Category {
    id: row.get(0)?,
    name: row.get(1)?,
    created_at: time_column(row, 2)?,
    updated_at: time_column(row, 3)?,
  })
}

fn all(db: &Database) -> Result<Vec<Category>> {
  let conn = db.conn()?;
  let mut stmt = conn
    .prepare("SELECT id, name, created_at, updated_at FROM categories ORDER BY id")
    .map_err(|e| eyre!("Failed to prepare categories query: {}", e))?;

  let categories = stmt
    .query_map([], category_from_row)
    .map_err(|e| eyre!("Failed to query categories: {}", e))?
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(|e| eyre!("Failed to read category: {}", e))?;

  Ok(categories)
}

pub struct CategoryRepository {
  db: Arc<Database>,
  hooks: Hooks,
}

impl CategoryRepository {
  pub const ALL: &'static str = "all_categories";

  pub fn new(db: Arc<Database>) -> Self {
    Self {
      db,
      hooks: Hooks::new("category"),
    }
  }

  pub fn cache_keys(db: &Arc<Database>) -> KeyRegistry {
    let db = Arc::clone(db);
    KeyRegistry::builder("category")
      .key(Self::ALL, move || all(&db))
      .build()
  }

  pub fn all(&self) -> Result<Vec<Category>> {
    all(&self.db)
  }

  pub fn find(&self, id: i64) -> Result<Option<Category>> {
    self
      .db
      .conn()?
      .query_row(
        "SELECT id, name, created_at, updated_at FROM categories WHERE id = ?",
        params![id],
        category_from_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to load category {}: {}", id, e))
  }

  pub fn create(&self, name: &str) -> Result<Category> {
    self.hooks.fire(LifecycleEvent::BeforeSave)?;

    let now = to_sql_time(&Utc::now());
    let id = {
      let conn = self.db.conn()?;
      conn
        .execute(
          "INSERT INTO categories (name, created_at, updated_at) VALUES (?, ?, ?)",
          params![name, now, now],
        )
        .map_err(|e| eyre!("Failed to insert category: {}", e))?;
      conn.last_insert_rowid()
    };

    self
      .hooks
      .fire(LifecycleEvent::AfterSave)
      .wrap_err_with(|| format!("Category {} was saved but its cache could not be regenerated", id))?;

    self
      .find(id)?
      .ok_or_else(|| eyre!("Category {} vanished after insert", id))
  }

  pub fn delete(&self, id: i64) -> Result<()> {
    if self.find(id)?.is_none() {
      return Err(eyre!("Category {} not found", id));
    }

    self.hooks.fire(LifecycleEvent::BeforeDelete)?;
    self
      .db
      .conn()?
      .execute("DELETE FROM categories WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete category {}: {}", id, e))?;
    self
      .hooks
      .fire(LifecycleEvent::AfterDelete)
      .wrap_err_with(|| format!("Category {} was deleted but its cache could not be regenerated", id))
  }
}

impl LifecycleSource for CategoryRepository {
  fn entity_type(&self) -> &'static str {
    self.hooks.entity_type()
  }

  fn on_before_save(&mut self, hook: Hook) {
    self.hooks.on_before_save(hook);
  }

  fn on_after_save(&mut self, hook: Hook) {
    self.hooks.on_after_save(hook);
  }

  fn on_before_delete(&mut self, hook: Hook) {
    self.hooks.on_before_delete(hook);
  }

  fn on_after_delete(&mut self, hook: Hook) {
    self.hooks.on_after_delete(hook);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheOrchestrator, CacheStore, MemoryStore};
  use crate::db::{NewPost, PostRepository};
  use serde_json::json;

  #[test]
  fn test_entity_types_do_not_share_keys() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let cache = CacheOrchestrator::new(MemoryStore::new());
    let post_keys = PostRepository::cache_keys(&db);
    let category_keys = CategoryRepository::cache_keys(&db);
    let mut posts = PostRepository::new(Arc::clone(&db));
    let mut categories = CategoryRepository::new(Arc::clone(&db));
    cache.register(&post_keys, &mut posts);
    cache.register(&category_keys, &mut categories);

    posts.create(NewPost::new("Title", "Body")).unwrap();
    categories.create("News").unwrap();

    let cached = cache
      .store()
      .get(CategoryRepository::ALL)
      .unwrap()
      .unwrap();
    assert_eq!(cached[0]["name"], json!("News"));

    // A key is only managed through the registry that declared it
    assert_eq!(cache.force_fetch(&post_keys, CategoryRepository::ALL).unwrap(), None);
    assert_eq!(
      cache.force_fetch(&category_keys, CategoryRepository::ALL).unwrap(),
      Some(cached)
    );
    assert_eq!(cache.store().len().unwrap(), 3);
  }

  #[test]
  fn test_delete_regenerates_categories() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let cache = CacheOrchestrator::new(MemoryStore::new());
    let keys = CategoryRepository::cache_keys(&db);
    let mut categories = CategoryRepository::new(Arc::clone(&db));
    cache.register(&keys, &mut categories);

    let news = categories.create("News").unwrap();
    categories.create("Sport").unwrap();
    categories.delete(news.id).unwrap();

    let remaining: Vec<Category> = cache
      .withdraw_as(&keys, CategoryRepository::ALL)
      .unwrap()
      .unwrap();
    assert_eq!(
      remaining.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
      vec!["Sport"]
    );
    assert!(categories.delete(news.id).is_err());
  }
}
