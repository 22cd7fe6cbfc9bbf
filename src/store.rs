//! Query-state store: per-view [`QueryDescriptor`] values with durable
//! persistence and change notification.
//!
//! Each list view owns one descriptor, addressed by a view key such as
//! `"orders"` or `"reports"`. The in-memory value is authoritative for the
//! session; every mutation notifies subscribers first and then writes to
//! durable storage best-effort. A write failure (quota, I/O) is logged and
//! swallowed so the UI never blocks or loses its state mid-session.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::query::QueryDescriptor;
use crate::storage::StateStorage;

struct ViewSlot {
  // The sender doubles as the value holder; `borrow()` reads the current
  // descriptor without a subscriber.
  tx: watch::Sender<QueryDescriptor>,
}

/// Holds, mutates and persists one [`QueryDescriptor`] per view key.
pub struct QueryStore<S: StateStorage> {
  storage: S,
  views: Mutex<HashMap<String, ViewSlot>>,
}

impl<S: StateStorage> QueryStore<S> {
  /// Create a store over the given durable storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage,
      views: Mutex::new(HashMap::new()),
    }
  }

  fn views(&self) -> MutexGuard<'_, HashMap<String, ViewSlot>> {
    self.views.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Current descriptor for `view_key`.
  ///
  /// The first call for a key loads it from durable storage; an absent or
  /// malformed persisted value falls back to `default` without persisting
  /// anything. Later calls return the in-memory value.
  pub fn get(&self, view_key: &str, default: QueryDescriptor) -> QueryDescriptor {
    let mut views = self.views();
    if let Some(slot) = views.get(view_key) {
      return slot.tx.borrow().clone();
    }

    let value = self.load(view_key).unwrap_or(default);
    let (tx, _rx) = watch::channel(value.clone());
    views.insert(view_key.to_string(), ViewSlot { tx });
    value
  }

  /// Apply a pure updater to the descriptor for `view_key`.
  ///
  /// Subscribers are notified synchronously after the in-memory value
  /// changes and before the durable write; durability is best-effort.
  pub fn update<F>(&self, view_key: &str, updater: F) -> QueryDescriptor
  where
    F: FnOnce(&QueryDescriptor) -> QueryDescriptor,
  {
    let mut views = self.views();
    let slot = views.entry(view_key.to_string()).or_insert_with(|| {
      let value = self.load(view_key).unwrap_or_default();
      let (tx, _rx) = watch::channel(value);
      ViewSlot { tx }
    });

    let next = updater(&slot.tx.borrow());
    slot.tx.send_replace(next.clone());
    drop(views);

    self.persist(view_key, &next);
    next
  }

  /// Replace the descriptor for `view_key` wholesale.
  pub fn replace(&self, view_key: &str, value: QueryDescriptor) -> QueryDescriptor {
    self.update(view_key, move |_| value)
  }

  /// Subscribe to descriptor changes for `view_key`.
  ///
  /// Creates the slot from durable storage (or the type default) when the
  /// view has not been read yet.
  pub fn changes(&self, view_key: &str) -> watch::Receiver<QueryDescriptor> {
    let mut views = self.views();
    let slot = views.entry(view_key.to_string()).or_insert_with(|| {
      let value = self.load(view_key).unwrap_or_default();
      let (tx, _rx) = watch::channel(value);
      ViewSlot { tx }
    });
    slot.tx.subscribe()
  }

  /// Read and validate a persisted descriptor. Any failure means "absent".
  fn load(&self, view_key: &str) -> Option<QueryDescriptor> {
    let raw = match self.storage.get(view_key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(view_key, error = %e, "failed to read persisted query state");
        return None;
      }
    };

    match serde_json::from_str::<QueryDescriptor>(&raw) {
      Ok(q) if q.is_valid() => Some(q),
      Ok(_) => {
        debug!(view_key, "persisted query state violates invariants, using default");
        None
      }
      Err(e) => {
        debug!(view_key, error = %e, "malformed persisted query state, using default");
        None
      }
    }
  }

  fn persist(&self, view_key: &str, value: &QueryDescriptor) {
    let raw = match serde_json::to_string(value) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(view_key, error = %e, "failed to serialize query state");
        return;
      }
    };

    if let Err(e) = self.storage.set(view_key, &raw) {
      warn!(view_key, error = %e, "failed to persist query state");
    }
  }
}
