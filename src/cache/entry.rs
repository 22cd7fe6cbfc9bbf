//! Cache entry state.

use serde_json::Value;
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::watch;

use crate::transport::FetchError;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
  /// Initial fetch has not completed yet
  Pending,
  /// Last fetch succeeded; `data` is present
  Fulfilled,
  /// Last fetch failed; `error` is present
  Rejected,
}

/// Read-only view of a cache entry handed to subscribers.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
  pub status: EntryStatus,
  /// Last successfully fetched payload. Retained during refetches so the
  /// UI can keep rendering while fresh data is on the way.
  pub data: Option<Value>,
  pub error: Option<FetchError>,
  /// Marked by an intersecting mutation; cleared when a refetch lands.
  pub stale: bool,
  /// A request for this entry is currently in flight.
  pub fetching: bool,
}

impl EntrySnapshot {
  pub fn is_pending(&self) -> bool {
    self.status == EntryStatus::Pending
  }

  pub fn data(&self) -> Option<&Value> {
    self.data.as_ref()
  }

  pub fn error(&self) -> Option<&FetchError> {
    self.error.as_ref()
  }

  /// Snapshot for a subscription whose entry no longer exists. The
  /// refcount invariant keeps an entry alive while any handle is held,
  /// so this never surfaces through `Subscription`; it is shaped like a
  /// failed query so a consumer that did observe it would render the
  /// standard error state with a retry affordance, the same way a
  /// cancelled in-flight fetch is reported.
  pub(crate) fn detached() -> Self {
    Self {
      status: EntryStatus::Rejected,
      data: None,
      error: Some(FetchError::transport("cache entry evicted")),
      stale: false,
      fetching: false,
    }
  }
}

/// Internal mutable state for one cached `(endpoint, args)` pair.
pub(crate) struct Entry {
  pub endpoint: String,
  pub args: Value,
  pub status: EntryStatus,
  pub data: Option<Value>,
  pub error: Option<FetchError>,
  pub stale: bool,
  pub tags: HashSet<String>,
  pub subscriber_count: usize,
  /// Sequence number of the most recently issued request for this key.
  pub last_issued_seq: u64,
  /// Sequence number of the most recently applied response. Responses
  /// with a lower sequence are superseded and dropped.
  pub last_applied_seq: u64,
  pub in_flight: bool,
  /// Highest sequence issued anywhere when this entry was last
  /// invalidated. A response whose request carries a sequence at or
  /// below this predates the mutation and cannot clear `stale`.
  pub invalidated_seq: u64,
  /// When the last successful response was applied; drives age-based
  /// staleness on subscribe.
  pub fetched_at: Option<Instant>,
  /// Bumped on every subscribe so pending eviction timers can tell a
  /// resubscribed entry from an abandoned one.
  pub gc_epoch: u64,
  /// Version channel; bumped on every observable state change.
  pub changed: watch::Sender<u64>,
  version: u64,
}

impl Entry {
  pub fn new(endpoint: &str, args: Value, tags: HashSet<String>) -> Self {
    let (changed, _rx) = watch::channel(0);
    Self {
      endpoint: endpoint.to_string(),
      args,
      status: EntryStatus::Pending,
      data: None,
      error: None,
      stale: false,
      tags,
      subscriber_count: 0,
      last_issued_seq: 0,
      last_applied_seq: 0,
      in_flight: false,
      invalidated_seq: 0,
      fetched_at: None,
      gc_epoch: 0,
      changed,
      version: 0,
    }
  }

  /// Notify subscribers of a state change.
  pub fn touch(&mut self) {
    self.version += 1;
    let _ = self.changed.send(self.version);
  }

  pub fn snapshot(&self) -> EntrySnapshot {
    EntrySnapshot {
      status: self.status,
      data: self.data.clone(),
      error: self.error.clone(),
      stale: self.stale,
      fetching: self.in_flight,
    }
  }
}
