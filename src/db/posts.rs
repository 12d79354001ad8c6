//! Posts and their cached views.

use chrono::{DateTime, Utc};
use color_eyre::{
  eyre::{eyre, WrapErr},
  Result,
};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{
  opt_time_column, serialize_opt_time, serialize_time, time_column, to_sql_time, Database,
};
use crate::cache::KeyRegistry;
use crate::lifecycle::{Hook, Hooks, LifecycleEvent, LifecycleSource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
  pub id: i64,
  pub category_id: Option<i64>,
  pub title: String,
  pub content: String,
  #[serde(serialize_with = "serialize_opt_time")]
  pub published_at: Option<DateTime<Utc>>,
  #[serde(serialize_with = "serialize_time")]
  pub created_at: DateTime<Utc>,
  #[serde(serialize_with = "serialize_time")]
  pub updated_at: DateTime<Utc>,
}

/// Fields for a post that doesn't exist yet.
#[derive(Debug, Clone, Default)]
pub struct NewPost {
  pub category_id: Option<i64>,
  pub title: String,
  pub content: String,
  pub published_at: Option<DateTime<Utc>>,
}

impl NewPost {
  pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
    Self {
      title: title.into(),
      content: content.into(),
      ..Self::default()
    }
  }

  pub fn in_category(mut self, category_id: i64) -> Self {
    self.category_id = Some(category_id);
    self
  }

  pub fn published_at(mut self, published_at: DateTime<Utc>) -> Self {
    self.published_at = Some(published_at);
    self
  }
}

/// Fields to change on an existing post. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct PostChanges {
  pub title: Option<String>,
  pub content: Option<String>,
  /// `Some(None)` removes the post from its category.
  pub category_id: Option<Option<i64>>,
}

const POST_COLUMNS: &str = "id, category_id, title, content, published_at, created_at, updated_at";

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
  Ok(Post {
    id: row.get(0)?,
    category_id: row.get(1)?,
    title: row.get(2)?,
    content: row.get(3)?,
    published_at: opt_time_column(row, 4)?,
    created_at: time_column(row, 5)?,
    updated_at: time_column(row, 6)?,
  })
}

/// Every post, ordered by id.
fn all(db: &Database) -> Result<Vec<Post>> {
  let conn = db.conn()?;
  let mut stmt = conn
    .prepare(&format!("SELECT {} FROM posts ORDER BY id", POST_COLUMNS))
    .map_err(|e| eyre!("Failed to prepare posts query: {}", e))?;

  let posts = stmt
    .query_map([], post_from_row)
    .map_err(|e| eyre!("Failed to query posts: {}", e))?
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(|e| eyre!("Failed to read post: {}", e))?;

  Ok(posts)
}

fn find(db: &Database, id: i64) -> Result<Option<Post>> {
  db.conn()?
    .query_row(
      &format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS),
      params![id],
      post_from_row,
    )
    .optional()
    .map_err(|e| eyre!("Failed to load post {}: {}", id, e))
}

/// Post persistence with save/delete lifecycle hooks.
pub struct PostRepository {
  db: Arc<Database>,
  hooks: Hooks,
  now: fn() -> DateTime<Utc>,
}

impl PostRepository {
  /// Every post, as stored.
  pub const ALL: &'static str = "all_posts";
  /// Post id to title.
  pub const SELECT: &'static str = "select_posts";

  pub fn new(db: Arc<Database>) -> Self {
    Self {
      db,
      hooks: Hooks::new("post"),
      now: Utc::now,
    }
  }

  /// Use a fixed clock for timestamps.
  pub fn with_clock(mut self, now: fn() -> DateTime<Utc>) -> Self {
    self.now = now;
    self
  }

  /// Cached views of the posts table.
  pub fn cache_keys(db: &Arc<Database>) -> KeyRegistry {
    let all_db = Arc::clone(db);
    let select_db = Arc::clone(db);

    KeyRegistry::builder("post")
      .key(Self::ALL, move || all(&all_db))
      .key(Self::SELECT, move || {
        Ok(
          all(&select_db)?
            .into_iter()
            .map(|post| (post.id, post.title))
            .collect::<BTreeMap<_, _>>(),
        )
      })
      .build()
  }

  pub fn all(&self) -> Result<Vec<Post>> {
    all(&self.db)
  }

  pub fn find(&self, id: i64) -> Result<Option<Post>> {
    find(&self.db, id)
  }

  pub fn first(&self) -> Result<Option<Post>> {
    self
      .db
      .conn()?
      .query_row(
        &format!("SELECT {} FROM posts ORDER BY id LIMIT 1", POST_COLUMNS),
        [],
        post_from_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to load first post: {}", e))
  }

  pub fn count(&self) -> Result<usize> {
    let count: i64 = self
      .db
      .conn()?
      .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count posts: {}", e))?;
    Ok(count as usize)
  }

  /// Insert a post, firing the save hooks around the write.
  pub fn create(&self, post: NewPost) -> Result<Post> {
    self.hooks.fire(LifecycleEvent::BeforeSave)?;
    let post = self.insert(&post)?;
    self
      .hooks
      .fire(LifecycleEvent::AfterSave)
      .wrap_err_with(|| format!("Post {} was saved but its cache could not be regenerated", post.id))?;
    Ok(post)
  }

  /// Insert a post without firing any hooks.
  pub fn insert_quietly(&self, post: NewPost) -> Result<Post> {
    self.insert(&post)
  }

  fn insert(&self, post: &NewPost) -> Result<Post> {
    let now = to_sql_time(&(self.now)());
    let id = {
      let conn = self.db.conn()?;
      conn
        .execute(
          "INSERT INTO posts (category_id, title, content, published_at, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?)",
          params![
            post.category_id,
            post.title,
            post.content,
            post.published_at.as_ref().map(to_sql_time),
            now,
            now
          ],
        )
        .map_err(|e| eyre!("Failed to insert post: {}", e))?;
      conn.last_insert_rowid()
    };

    self
      .find(id)?
      .ok_or_else(|| eyre!("Post {} vanished after insert", id))
  }

  /// Apply `changes` to an existing post, firing the save hooks around the write.
  pub fn update(&self, id: i64, changes: PostChanges) -> Result<Post> {
    let mut post = self
      .find(id)?
      .ok_or_else(|| eyre!("Post {} not found", id))?;

    if let Some(title) = changes.title {
      post.title = title;
    }
    if let Some(content) = changes.content {
      post.content = content;
    }
    if let Some(category_id) = changes.category_id {
      post.category_id = category_id;
    }
    post.updated_at = (self.now)();

    self.hooks.fire(LifecycleEvent::BeforeSave)?;
    self
      .db
      .conn()?
      .execute(
        "UPDATE posts SET category_id = ?, title = ?, content = ?, updated_at = ? WHERE id = ?",
        params![
          post.category_id,
          post.title,
          post.content,
          to_sql_time(&post.updated_at),
          id
        ],
      )
      .map_err(|e| eyre!("Failed to update post {}: {}", id, e))?;
    self
      .hooks
      .fire(LifecycleEvent::AfterSave)
      .wrap_err_with(|| format!("Post {} was updated but its cache could not be regenerated", id))?;

    self
      .find(id)?
      .ok_or_else(|| eyre!("Post {} vanished after update", id))
  }

  /// Delete a post, firing the delete hooks around the write.
  pub fn delete(&self, id: i64) -> Result<()> {
    if self.find(id)?.is_none() {
      return Err(eyre!("Post {} not found", id));
    }

    self.hooks.fire(LifecycleEvent::BeforeDelete)?;
    self
      .db
      .conn()?
      .execute("DELETE FROM posts WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete post {}: {}", id, e))?;
    self
      .hooks
      .fire(LifecycleEvent::AfterDelete)
      .wrap_err_with(|| format!("Post {} was deleted but its cache could not be regenerated", id))
  }
}

impl LifecycleSource for PostRepository {
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
