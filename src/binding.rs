//! Derived-view binding: composes the query-state store with the server
//! cache to drive one list view.
//!
//! A binding reads the view's [`QueryDescriptor`], subscribes to its
//! changes, and holds a cache subscription for the descriptor serialized as
//! request args. When the descriptor changes, the binding re-issues the
//! query (cache hits and in-flight dedup apply as usual) and drops the old
//! subscription, which starts its grace period. Dropping the binding
//! unsubscribes; a remount with an unchanged key inside the grace period
//! reuses the cache entry instead of fetching again.

use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use crate::cache::{CacheClient, EntrySnapshot, Subscription};
use crate::query::QueryDescriptor;
use crate::storage::StateStorage;
use crate::store::QueryStore;
use crate::transport::Transport;

/// What changed when [`ViewBinding::changed`] resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingEvent {
  /// The view's query descriptor changed; a query with the new args has
  /// already been issued.
  QueryChanged,
  /// The cache entry changed (response arrived, invalidation, retry).
  DataChanged,
  /// The store side was torn down; no further events will arrive.
  Closed,
}

/// Live binding between one view's query state and the server cache.
pub struct ViewBinding<T: Transport> {
  cache: CacheClient<T>,
  endpoint: String,
  provides: Vec<String>,
  query_rx: watch::Receiver<QueryDescriptor>,
  sub: Subscription<T>,
}

impl<T: Transport> ViewBinding<T> {
  /// Mount a view: load its query state, subscribe to changes, and issue
  /// the initial cache query.
  pub fn bind<S: StateStorage>(
    store: &QueryStore<S>,
    cache: &CacheClient<T>,
    view_key: &str,
    endpoint: &str,
    default: QueryDescriptor,
    provides: &[&str],
  ) -> Self {
    let query = store.get(view_key, default);
    let query_rx = store.changes(view_key);
    let sub = cache.query(endpoint, descriptor_args(&query), provides);

    Self {
      cache: cache.clone(),
      endpoint: endpoint.to_string(),
      provides: provides.iter().map(|t| t.to_string()).collect(),
      query_rx,
      sub,
    }
  }

  /// Wait for the next change on either side.
  ///
  /// A query-state change swaps the cache subscription to the new args
  /// before resolving, so callers only need to re-render.
  pub async fn changed(&mut self) -> BindingEvent {
    enum Side {
      Query(bool),
      Data(bool),
    }

    // Decide which side fired first, then act once the select borrows are
    // released.
    let side = tokio::select! {
      res = self.query_rx.changed() => Side::Query(res.is_ok()),
      alive = self.sub.changed() => Side::Data(alive),
    };

    match side {
      Side::Query(true) => {
        let query = self.query_rx.borrow_and_update().clone();
        let tags: Vec<&str> = self.provides.iter().map(String::as_str).collect();
        // The previous subscription drops here and enters its grace
        // period; same-args updates resolve to the same entry.
        self.sub = self
          .cache
          .query(&self.endpoint, descriptor_args(&query), &tags);
        BindingEvent::QueryChanged
      }
      Side::Data(true) => BindingEvent::DataChanged,
      Side::Query(false) | Side::Data(false) => BindingEvent::Closed,
    }
  }

  /// Current query descriptor for the bound view.
  pub fn query(&self) -> QueryDescriptor {
    self.query_rx.borrow().clone()
  }

  /// Current cache entry state.
  pub fn data(&self) -> EntrySnapshot {
    self.sub.snapshot()
  }

  /// Retry affordance for a failed query.
  pub fn retry(&self) {
    self.sub.retry();
  }

  /// Cache key of the current subscription.
  pub fn cache_key(&self) -> &str {
    self.sub.key()
  }
}

/// Serialize a descriptor as request args. Descriptors are plain data, so
/// serialization only fails on pathological filter values.
fn descriptor_args(query: &QueryDescriptor) -> Value {
  serde_json::to_value(query).unwrap_or_else(|e| {
    warn!(error = %e, "failed to serialize query descriptor");
    Value::Null
  })
}
