//! Error kinds attached to cache failures.
//!
//! Failures travel as `color_eyre` reports. The layer tags them with a
//! [`CacheError`] context so callers can tell a failing producer from an
//! unavailable store with `report.downcast_ref::<CacheError>()`.

use color_eyre::eyre::Report;
use std::fmt;
use thiserror::Error;

/// The store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
  Get,
  Forget,
  Store,
  Flush,
}

impl fmt::Display for StoreOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      StoreOp::Get => "get",
      StoreOp::Forget => "forget",
      StoreOp::Store => "store",
      StoreOp::Flush => "flush",
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
  /// The producer bound to a key failed while regenerating it.
  #[error("producer for cache key '{key}' failed")]
  ProducerFailed { key: String },

  /// The cache store itself failed.
  #[error("cache store failed to {operation} '{key}'")]
  StoreUnavailable { operation: StoreOp, key: String },
}

impl CacheError {
  /// Find the cache error attached to a report, if any.
  pub fn of(report: &Report) -> Option<&CacheError> {
    report.downcast_ref::<CacheError>()
  }

  pub(crate) fn store(operation: StoreOp, key: &str) -> Self {
    CacheError::StoreUnavailable {
      operation,
      key: key.to_string(),
    }
  }
}
