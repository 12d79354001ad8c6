//! SQLite persistence for the entities whose views are cached.

pub mod categories;
pub mod posts;
mod schema;

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use serde::Serializer;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub use categories::{Category, CategoryRepository};
pub use posts::{NewPost, Post, PostChanges, PostRepository};

/// Database connection wrapper shared by repositories and cache producers
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at the default location
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create the database at the given path
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
      }
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory database
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations()?;

    Ok(db)
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("cache-machine").join("app.db"))
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// Lock the connection. Release the guard before firing lifecycle hooks.
  pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Format a timestamp for storage.
pub(crate) fn to_sql_time(time: &DateTime<Utc>) -> String {
  time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Read a stored timestamp column.
/// Serialize a timestamp in its stored column format.
pub(crate) fn serialize_time<S: Serializer>(
  time: &DateTime<Utc>,
  serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
  serializer.serialize_str(&to_sql_time(time))
}

pub(crate) fn serialize_opt_time<S: Serializer>(
  time: &Option<DateTime<Utc>>,
  serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
  match time {
    Some(time) => serialize_time(time, serializer),
    None => serializer.serialize_none(),
  }
}

pub(crate) fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  let raw: String = row.get(idx)?;
  parse_time(&raw, idx)
}

/// Read a nullable stored timestamp column.
pub(crate) fn opt_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
  let raw: Option<String> = row.get(idx)?;
  raw.map(|s| parse_time(&s, idx)).transpose()
}

fn parse_time(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(raw)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
