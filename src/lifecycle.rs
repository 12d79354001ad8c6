//! Entity lifecycle hooks.
//!
//! A persistence layer exposes four registration points per entity type. Each
//! mutating operation fires the matching "before" hooks, applies the write,
//! then fires the "after" hooks.

use color_eyre::Result;
use std::fmt;
use tracing::warn;

/// A zero-argument handler fired at one point of an entity mutation.
pub type Hook = Box<dyn Fn() -> Result<()> + Send + Sync>;

/// Points in a mutation where hooks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
  BeforeSave,
  AfterSave,
  BeforeDelete,
  AfterDelete,
}

impl LifecycleEvent {
  pub const ALL: [LifecycleEvent; 4] = [
    LifecycleEvent::BeforeSave,
    LifecycleEvent::AfterSave,
    LifecycleEvent::BeforeDelete,
    LifecycleEvent::AfterDelete,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      LifecycleEvent::BeforeSave => "before-save",
      LifecycleEvent::AfterSave => "after-save",
      LifecycleEvent::BeforeDelete => "before-delete",
      LifecycleEvent::AfterDelete => "after-delete",
    }
  }

  /// Whether this event fires before the write is applied.
  pub fn is_before(&self) -> bool {
    matches!(self, LifecycleEvent::BeforeSave | LifecycleEvent::BeforeDelete)
  }
}

impl fmt::Display for LifecycleEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Something that fires hooks around its mutations.
pub trait LifecycleSource {
  /// Entity type name, used for logging (e.g., "post").
  fn entity_type(&self) -> &'static str;

  fn on_before_save(&mut self, hook: Hook);

  fn on_after_save(&mut self, hook: Hook);

  fn on_before_delete(&mut self, hook: Hook);

  fn on_after_delete(&mut self, hook: Hook);

  /// Register a hook for the given event.
  fn on(&mut self, event: LifecycleEvent, hook: Hook) {
    match event {
      LifecycleEvent::BeforeSave => self.on_before_save(hook),
      LifecycleEvent::AfterSave => self.on_after_save(hook),
      LifecycleEvent::BeforeDelete => self.on_before_delete(hook),
      LifecycleEvent::AfterDelete => self.on_after_delete(hook),
    }
  }
}

/// Hook table for one entity type.
///
/// Persistence code embeds a `Hooks` and calls [`Hooks::fire`] around each
/// write. Before-events stop at the first failing hook so the caller can abort
/// the write. After-events run every hook and return the first failure.
pub struct Hooks {
  entity_type: &'static str,
  before_save: Vec<Hook>,
  after_save: Vec<Hook>,
  before_delete: Vec<Hook>,
  after_delete: Vec<Hook>,
}

impl Hooks {
  pub fn new(entity_type: &'static str) -> Self {
    Self {
      entity_type,
      before_save: Vec::new(),
      after_save: Vec::new(),
      before_delete: Vec::new(),
      after_delete: Vec::new(),
    }
  }

  fn slot(&self, event: LifecycleEvent) -> &[Hook] {
    match event {
      LifecycleEvent::BeforeSave => &self.before_save,
      LifecycleEvent::AfterSave => &self.after_save,
      LifecycleEvent::BeforeDelete => &self.before_delete,
      LifecycleEvent::AfterDelete => &self.after_delete,
    }
  }

  /// Number of hooks registered for an event.
  pub fn count(&self, event: LifecycleEvent) -> usize {
    self.slot(event).len()
  }

  /// Run every hook registered for `event`, in registration order.
  pub fn fire(&self, event: LifecycleEvent) -> Result<()> {
    let hooks = self.slot(event);

    if event.is_before() {
      for hook in hooks {
        hook()?;
      }
      return Ok(());
    }

    let mut first_error = None;
    for hook in hooks {
      if let Err(e) = hook() {
        warn!(
          entity_type = self.entity_type,
          event = %event,
          error = %e,
          "lifecycle hook failed"
        );
        first_error.get_or_insert(e);
      }
    }

    match first_error {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}

impl LifecycleSource for Hooks {
  fn entity_type(&self) -> &'static str {
    self.entity_type
  }

  fn on_before_save(&mut self, hook: Hook) {
    self.before_save.push(hook);
  }

  fn on_after_save(&mut self, hook: Hook) {
    self.after_save.push(hook);
  }

  fn on_before_delete(&mut self, hook: Hook) {
    self.before_delete.push(hook);
  }

  fn on_after_delete(&mut self, hook: Hook) {
    self.after_delete.push(hook);
  }
}

impl fmt::Debug for Hooks {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Hooks")
      .field("entity_type", &self.entity_type)
      .field("before_save", &self.before_save.len())
      .field("after_save", &self.after_save.len())
      .field("before_delete", &self.before_delete.len())
      .field("after_delete", &self.after_delete.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::{Arc, Mutex};

  fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Hook {
    let log = Arc::clone(log);
    Box::new(move || {
      log.lock().unwrap().push(name);
      Ok(())
    })
  }

  fn failing(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Hook {
    let log = Arc::clone(log);
    Box::new(move || {
      log.lock().unwrap().push(name);
      Err(eyre!("{} failed", name))
    })
  }

  #[test]
  fn test_hooks_fire_in_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut hooks = Hooks::new("post");
    hooks.on_after_save(recorder(&log, "first"));
    hooks.on_after_save(recorder(&log, "second"));

    hooks.fire(LifecycleEvent::AfterSave).unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
  }

  #[test]
  fn test_events_are_independent() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut hooks = Hooks::new("post");
    hooks.on(LifecycleEvent::BeforeDelete, recorder(&log, "before-delete"));

    hooks.fire(LifecycleEvent::BeforeSave).unwrap();
    hooks.fire(LifecycleEvent::AfterSave).unwrap();
    assert!(log.lock().unwrap().is_empty());

    hooks.fire(LifecycleEvent::BeforeDelete).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["before-delete"]);
    assert_eq!(hooks.count(LifecycleEvent::BeforeDelete), 1);
    assert_eq!(hooks.count(LifecycleEvent::AfterDelete), 0);
  }

  #[test]
  fn test_before_event_stops_at_first_failure() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut hooks = Hooks::new("post");
    hooks.on_before_save(failing(&log, "a"));
    hooks.on_before_save(recorder(&log, "b"));

    let err = hooks.fire(LifecycleEvent::BeforeSave).unwrap_err();

    assert_eq!(err.to_string(), "a failed");
    assert_eq!(*log.lock().unwrap(), vec!["a"]);
  }

  #[test]
  fn test_after_event_runs_all_and_reports_first_failure() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut hooks = Hooks::new("post");
    hooks.on_after_delete(failing(&log, "a"));
    hooks.on_after_delete(recorder(&log, "b"));
    hooks.on_after_delete(failing(&log, "c"));

    let err = hooks.fire(LifecycleEvent::AfterDelete).unwrap_err();

    assert_eq!(err.to_string(), "a failed");
    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
  }
}
