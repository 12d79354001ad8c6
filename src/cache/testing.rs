//! Recording store used by the crate's tests.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::storage::MemoryStore;
use super::traits::CacheStore;

/// One observed store call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
  Get { key: String },
  Forget { key: String },
  GetOrSetForever { key: String, produced: bool },
  Flush,
}

impl Call {
  pub fn is_write(&self) -> bool {
    !matches!(self, Call::Get { .. })
  }
}

type Probe = Box<dyn Fn() -> i64 + Send + Sync>;

/// `MemoryStore` wrapper that records every call in order.
///
/// An optional probe is evaluated at each call, letting a test observe
/// external state (e.g. a row count) at the moment the call happened.
#[derive(Default)]
pub struct RecordingStore {
  inner: MemoryStore,
  calls: Mutex<Vec<(Call, Option<i64>)>>,
  probe: Option<Probe>,
  fail_get: AtomicBool,
  fail_forget: AtomicBool,
  fail_store: AtomicBool,
}

impl RecordingStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_probe<F>(mut self, probe: F) -> Self
  where
    F: Fn() -> i64 + Send + Sync + 'static,
  {
    self.probe = Some(Box::new(probe));
    self
  }

  /// Make every subsequent `get` fail.
  pub fn fail_get(&self, fail: bool) {
    self.fail_get.store(fail, Ordering::SeqCst);
  }

  /// Make every subsequent `forget` fail.
  pub fn fail_forget(&self, fail: bool) {
    self.fail_forget.store(fail, Ordering::SeqCst);
  }

  /// Make every subsequent `get_or_set_forever` fail before producing.
  pub fn fail_store(&self, fail: bool) {
    self.fail_store.store(fail, Ordering::SeqCst);
  }

  fn record(&self, call: Call) {
    let observed = self.probe.as_ref().map(|probe| probe());
    self.calls.lock().unwrap().push((call, observed));
  }

  pub fn calls(&self) -> Vec<Call> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .map(|(call, _)| call.clone())
      .collect()
  }

  /// Calls with the probe value observed when each happened.
  pub fn observed(&self) -> Vec<(Call, Option<i64>)> {
    self.calls.lock().unwrap().clone()
  }

  pub fn writes(&self) -> Vec<Call> {
    self.calls().into_iter().filter(Call::is_write).collect()
  }

  pub fn clear_calls(&self) {
    self.calls.lock().unwrap().clear();
  }

  /// Number of `get_or_set_forever` calls that invoked the producer.
  pub fn regenerations(&self, key: &str) -> usize {
    self
      .calls()
      .iter()
      .filter(|call| {
        matches!(call, Call::GetOrSetForever { key: k, produced: true } if k == key)
      })
      .count()
  }

  pub fn inner(&self) -> &MemoryStore {
    &self.inner
  }
}

impl CacheStore for RecordingStore {
  fn get(&self, key: &str) -> Result<Option<Value>> {
    self.record(Call::Get {
      key: key.to_string(),
    });
    if self.fail_get.load(Ordering::SeqCst) {
      return Err(eyre!("connection refused"));
    }
    self.inner.get(key)
  }

  fn forget(&self, key: &str) -> Result<()> {
    self.record(Call::Forget {
      key: key.to_string(),
    });
    if self.fail_forget.load(Ordering::SeqCst) {
      return Err(eyre!("connection refused"));
    }
    self.inner.forget(key)
  }

  fn get_or_set_forever(&self, key: &str, producer: &dyn Fn() -> Result<Value>) -> Result<Value> {
    if self.fail_store.load(Ordering::SeqCst) {
      self.record(Call::GetOrSetForever {
        key: key.to_string(),
        produced: false,
      });
      return Err(eyre!("connection refused"));
    }
    let produced = Cell::new(false);
    let result = self.inner.get_or_set_forever(key, &|| {
      produced.set(true);
      producer()
    });
    self.record(Call::GetOrSetForever {
      key: key.to_string(),
      produced: produced.get(),
    });
    result
  }

  fn flush(&self) -> Result<()> {
    self.record(Call::Flush);
    self.inner.flush()
  }
}
