//! Server-cache layer: request execution, deduplication, tag invalidation
//! and grace-period garbage collection.
//!
//! Every `(endpoint, args)` pair maps to one cache entry. Subscribing to an
//! entry either hits the cache or joins the single in-flight request for
//! that key; no key ever has two requests in flight. Mutations declare
//! invalidation tags, and entries whose tag sets intersect are marked stale:
//! subscribed entries refetch immediately, unsubscribed ones lazily on the
//! next subscription. A fulfilled entry also goes stale by age: once its
//! last successful fetch is older than the configured stale time, the next
//! subscription refetches instead of serving the cached payload. Entries
//! with no subscribers are evicted only after a grace period, so a quickly
//! remounted view reuses its data.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

use super::entry::{Entry, EntrySnapshot, EntryStatus};
use super::key::cache_key;
use crate::transport::{unwrap_envelope, FetchError, Transport, TransportRequest};

struct CacheState {
  entries: HashMap<String, Entry>,
  /// Reverse index from invalidation tag to the keys that carry it.
  tag_index: HashMap<String, HashSet<String>>,
  /// Monotonic request sequence, shared across keys.
  next_seq: u64,
}

struct Inner<T> {
  transport: T,
  state: Mutex<CacheState>,
  grace_period: Duration,
  stale_time: Duration,
}

impl<T> Inner<T> {
  fn lock_state(&self) -> MutexGuard<'_, CacheState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Everything needed to run one network request outside the state lock.
struct FetchJob {
  key: String,
  endpoint: String,
  args: Value,
  seq: u64,
}

/// Caching client over a [`Transport`].
///
/// Cheap to clone; clones share the same cache.
pub struct CacheClient<T: Transport> {
  inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for CacheClient<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Transport> CacheClient<T> {
  /// Create a cache client with the default grace period and stale time.
  pub fn new(transport: T) -> Self {
    Self::with_timings(transport, Duration::from_secs(60), Duration::from_secs(300))
  }

  /// Create a cache client with an explicit eviction grace period.
  pub fn with_grace_period(transport: T, grace_period: Duration) -> Self {
    Self::with_timings(transport, grace_period, Duration::from_secs(300))
  }

  /// Create a cache client with explicit eviction and staleness timings.
  ///
  /// `grace_period` is how long an unsubscribed entry survives before
  /// eviction; `stale_time` is how old a fulfilled entry may grow before a
  /// new subscription refetches it.
  pub fn with_timings(transport: T, grace_period: Duration, stale_time: Duration) -> Self {
    Self {
      inner: Arc::new(Inner {
        transport,
        state: Mutex::new(CacheState {
          entries: HashMap::new(),
          tag_index: HashMap::new(),
          next_seq: 0,
        }),
        grace_period,
        stale_time,
      }),
    }
  }

  /// Subscribe to the cached result for `(endpoint, args)`.
  ///
  /// A fresh or stale entry issues exactly one request for its key, no
  /// matter how many callers subscribe concurrently; a fulfilled entry is
  /// returned without touching the network. `provides` associates
  /// invalidation tags with the entry. Dropping the returned handle
  /// unsubscribes.
  pub fn query(&self, endpoint: &str, args: Value, provides: &[&str]) -> Subscription<T> {
    let key = cache_key(endpoint, &args);

    let (rx, job) = {
      let mut state = self.inner.lock_state();
      let state = &mut *state;

      let entry = state
        .entries
        .entry(key.clone())
        .or_insert_with(|| Entry::new(endpoint, args, HashSet::new()));
      entry.subscriber_count += 1;
      entry.gc_epoch += 1;
      let rx = entry.changed.subscribe();

      // Never issued, invalidated since the last response, or aged past
      // the stale time. Rejected entries are excluded from the age check;
      // those only refetch through an explicit retry.
      let aged = entry.status == EntryStatus::Fulfilled
        && entry
          .fetched_at
          .map(|at| at.elapsed() > self.inner.stale_time)
          .unwrap_or(false);
      let needs_fetch =
        !entry.in_flight && (entry.last_issued_seq == 0 || entry.stale || aged);

      let new_tags: Vec<String> = provides
        .iter()
        .map(|t| t.to_string())
        .filter(|t| entry.tags.insert(t.clone()))
        .collect();
      for tag in new_tags {
        state.tag_index.entry(tag).or_default().insert(key.clone());
      }

      let job = if needs_fetch {
        begin_fetch(state, &key)
      } else {
        None
      };
      (rx, job)
    };

    if let Some(job) = job {
      spawn_fetch(Arc::clone(&self.inner), job);
    }

    Subscription {
      inner: Arc::clone(&self.inner),
      key,
      rx,
    }
  }

  /// Issue a write and, on success, invalidate every entry whose tags
  /// intersect `invalidates`. A failed mutation invalidates nothing.
  pub async fn mutate(
    &self,
    endpoint: &str,
    args: Value,
    invalidates: &[&str],
  ) -> Result<Value, FetchError> {
    let fut = self.inner.transport.mutate(TransportRequest {
      endpoint: endpoint.to_string(),
      args,
    });

    let data = fut.await.and_then(unwrap_envelope)?;
    self.invalidate(invalidates);
    Ok(data)
  }

  /// Mark every entry carrying one of `tags` as stale. Subscribed entries
  /// refetch immediately; the rest wait for their next subscription.
  pub fn invalidate(&self, tags: &[&str]) {
    let jobs = {
      let mut state = self.inner.lock_state();
      let state = &mut *state;

      let keys: HashSet<String> = tags
        .iter()
        .filter_map(|tag| state.tag_index.get(*tag))
        .flatten()
        .cloned()
        .collect();

      // Responses to requests issued at or below this sequence predate
      // the invalidation and must not clear the stale mark.
      let cur_seq = state.next_seq;

      let mut jobs = Vec::new();
      for key in keys {
        let (subscribed, in_flight) = match state.entries.get_mut(&key) {
          Some(entry) => {
            entry.stale = true;
            entry.invalidated_seq = cur_seq;
            entry.touch();
            (entry.subscriber_count > 0, entry.in_flight)
          }
          None => continue,
        };

        if subscribed && !in_flight {
          if let Some(job) = begin_fetch(&mut *state, &key) {
            jobs.push(job);
          }
        }
      }
      jobs
    };

    for job in jobs {
      spawn_fetch(Arc::clone(&self.inner), job);
    }
  }

  /// Number of live cache entries, including those in their grace period.
  pub fn entry_count(&self) -> usize {
    self.inner.lock_state().entries.len()
  }
}

/// Mark a request as issued for `key` and hand back the job to run.
/// Returns `None` when a request is already in flight (dedup invariant).
fn begin_fetch(state: &mut CacheState, key: &str) -> Option<FetchJob> {
  let next_seq = state.next_seq + 1;
  let entry = state.entries.get_mut(key)?;
  if entry.in_flight {
    return None;
  }

  state.next_seq = next_seq;
  entry.in_flight = true;
  entry.last_issued_seq = next_seq;
  entry.touch();

  debug!(key, seq = next_seq, endpoint = %entry.endpoint, "issuing fetch");
  Some(FetchJob {
    key: key.to_string(),
    endpoint: entry.endpoint.clone(),
    args: entry.args.clone(),
    seq: next_seq,
  })
}

/// Run a fetch job to completion, looping while invalidations queued
/// during the flight demand a follow-up request.
fn spawn_fetch<T: Transport>(inner: Arc<Inner<T>>, job: FetchJob) {
  tokio::spawn(async move {
    let mut job = job;
    loop {
      let fut = inner.transport.query(TransportRequest {
        endpoint: job.endpoint.clone(),
        args: job.args.clone(),
      });
      let result = fut.await.and_then(unwrap_envelope);

      let follow_up = {
        let mut state = inner.lock_state();
        apply_response(&mut *state, &job, result)
      };

      match follow_up {
        Some(next) => job = next,
        None => break,
      }
    }
  });
}

/// Apply a response to its entry, guarding against superseded requests.
/// Returns a follow-up job when an invalidation landed mid-flight.
fn apply_response(
  state: &mut CacheState,
  job: &FetchJob,
  result: Result<Value, FetchError>,
) -> Option<FetchJob> {
  let follow = {
    // Entry may have been evicted while the request was in flight; the
    // response is then abandoned.
    let entry = state.entries.get_mut(&job.key)?;
    if job.seq < entry.last_applied_seq {
      debug!(key = %job.key, seq = job.seq, "dropping superseded response");
      return None;
    }

    entry.last_applied_seq = job.seq;
    entry.in_flight = false;

    let mut follow = false;
    match result {
      Ok(data) => {
        entry.status = EntryStatus::Fulfilled;
        entry.data = Some(data);
        entry.error = None;
        entry.fetched_at = Some(Instant::now());
        if job.seq > entry.invalidated_seq {
          entry.stale = false;
        } else {
          // The request was issued before an intersecting mutation landed,
          // so this payload cannot clear the stale mark. With subscribers
          // present, refetch right away; otherwise the entry stays stale
          // for the next subscription.
          follow = entry.subscriber_count > 0;
        }
      }
      Err(e) => {
        // Keep the last good payload so the UI can show data alongside
        // the failure. No automatic follow-up: a failed request is only
        // retried on demand, even when an invalidation is pending.
        entry.status = EntryStatus::Rejected;
        entry.error = Some(e);
      }
    }

    entry.touch();
    follow
  };

  if follow {
    begin_fetch(state, &job.key)
  } else {
    None
  }
}

/// Live subscription to one cache entry.
///
/// Holds a refcount on the entry; dropping it unsubscribes and, when the
/// count reaches zero, schedules eviction after the grace period. An
/// in-flight request is never cancelled by unsubscribing.
pub struct Subscription<T: Transport> {
  inner: Arc<Inner<T>>,
  key: String,
  rx: watch::Receiver<u64>,
}

impl<T: Transport> Subscription<T> {
  /// Cache key of the subscribed entry.
  pub fn key(&self) -> &str {
    &self.key
  }

  /// Current state of the entry.
  pub fn snapshot(&self) -> EntrySnapshot {
    self
      .inner
      .lock_state()
      .entries
      .get(&self.key)
      .map(Entry::snapshot)
      .unwrap_or_else(EntrySnapshot::detached)
  }

  /// Wait for the next observable change. Returns `false` if the entry
  /// was evicted (no further changes will arrive).
  pub async fn changed(&mut self) -> bool {
    self.rx.changed().await.is_ok()
  }

  /// Wait until the initial fetch has settled, then return the snapshot.
  /// Resolves immediately for fulfilled or rejected entries.
  pub async fn ready(&mut self) -> EntrySnapshot {
    loop {
      let snap = self.snapshot();
      if !snap.is_pending() {
        return snap;
      }
      if self.rx.changed().await.is_err() {
        return self.snapshot();
      }
    }
  }

  /// Re-issue the request for a rejected entry. No-op while a request is
  /// in flight or the entry is not in the rejected state; failures are
  /// retried on demand, never by a background loop.
  pub fn retry(&self) {
    let job = {
      let mut state = self.inner.lock_state();
      let retryable = state
        .entries
        .get(&self.key)
        .map(|e| e.status == EntryStatus::Rejected && !e.in_flight)
        .unwrap_or(false);
      if retryable {
        begin_fetch(&mut *state, &self.key)
      } else {
        None
      }
    };

    if let Some(job) = job {
      spawn_fetch(Arc::clone(&self.inner), job);
    }
  }
}

impl<T: Transport> Drop for Subscription<T> {
  fn drop(&mut self) {
    let schedule = {
      let mut state = self.inner.lock_state();
      match state.entries.get_mut(&self.key) {
        Some(entry) => {
          entry.subscriber_count = entry.subscriber_count.saturating_sub(1);
          (entry.subscriber_count == 0).then_some(entry.gc_epoch)
        }
        None => None,
      }
    };

    let Some(epoch) = schedule else { return };

    // Outside a runtime (e.g. a sync drop in teardown) the entry simply
    // lives until the process exits.
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
      return;
    };

    let inner = Arc::clone(&self.inner);
    let key = self.key.clone();
    let grace = self.inner.grace_period;
    handle.spawn(async move {
      tokio::time::sleep(grace).await;

      let mut state = inner.lock_state();
      let evict = state
        .entries
        .get(&key)
        .map(|e| e.subscriber_count == 0 && e.gc_epoch == epoch)
        .unwrap_or(false);
      if !evict {
        return;
      }

      if let Some(entry) = state.entries.remove(&key) {
        for tag in &entry.tags {
          if let Some(keys) = state.tag_index.get_mut(tag) {
            keys.remove(&key);
            if keys.is_empty() {
              state.tag_index.remove(tag);
            }
          }
        }
        debug!(key = %key, "evicted unsubscribed cache entry");
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transport::BoxFuture;
  use serde_json::json;
  use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
  use std::sync::Mutex as StdMutex;

  /// Transport that counts issued requests and serves a configurable
  /// response.
  #[derive(Clone, Default)]
  struct MockTransport {
    queries: Arc<AtomicU32>,
    mutations: Arc<AtomicU32>,
    response: Arc<StdMutex<Value>>,
    fail_queries: Arc<AtomicBool>,
    fail_mutations: Arc<AtomicBool>,
    delay: Duration,
  }

  impl MockTransport {
    fn with_response(response: Value) -> Self {
      let t = Self::default();
      *t.response.lock().unwrap() = response;
      t
    }

    fn with_delay(mut self, delay: Duration) -> Self {
      self.delay = delay;
      self
    }

    fn set_response(&self, response: Value) {
      *self.response.lock().unwrap() = response;
    }

    fn query_count(&self) -> u32 {
      self.queries.load(Ordering::SeqCst)
    }
  }

  impl Transport for MockTransport {
    fn query(&self, _req: TransportRequest) -> BoxFuture<Result<Value, FetchError>> {
      self.queries.fetch_add(1, Ordering::SeqCst);
      let response = self.response.lock().unwrap().clone();
      let fail = self.fail_queries.load(Ordering::SeqCst);
      let delay = self.delay;

      Box::pin(async move {
        tokio::time::sleep(delay).await;
        if fail {
          Err(FetchError::http(500, "server error"))
        } else {
          Ok(json!({ "data": response }))
        }
      })
    }

    fn mutate(&self, _req: TransportRequest) -> BoxFuture<Result<Value, FetchError>> {
      self.mutations.fetch_add(1, Ordering::SeqCst);
      let fail = self.fail_mutations.load(Ordering::SeqCst);

      Box::pin(async move {
        if fail {
          Err(FetchError::http(422, "rejected"))
        } else {
          Ok(json!({ "data": { "ok": true } }))
        }
      })
    }
  }

  async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
  }

  fn init_tracing() {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_test_writer()
      .try_init();
  }

  #[tokio::test]
  async fn fulfilled_entry_is_a_cache_hit() {
    init_tracing();
    let transport = MockTransport::with_response(json!([1, 2]));
    let client = CacheClient::new(transport.clone());

    let mut sub = client.query("orders/search", json!({"page": 1}), &["Orders"]);
    let snap = sub.ready().await;
    assert_eq!(snap.status, EntryStatus::Fulfilled);
    assert_eq!(snap.data, Some(json!([1, 2])));

    // Second subscriber with identical args: no network call, data served
    // from cache immediately.
    let sub2 = client.query("orders/search", json!({"page": 1}), &["Orders"]);
    let snap2 = sub2.snapshot();
    assert_eq!(snap2.status, EntryStatus::Fulfilled);
    assert_eq!(snap2.data, Some(json!([1, 2])));
    assert_eq!(transport.query_count(), 1);
  }

  #[tokio::test]
  async fn concurrent_identical_queries_issue_one_request() {
    let transport =
      MockTransport::with_response(json!(["a"])).with_delay(Duration::from_millis(50));
    let client = CacheClient::new(transport.clone());

    let mut sub1 = client.query("users/all", json!({}), &[]);
    let mut sub2 = client.query("users/all", json!({}), &[]);

    let (snap1, snap2) = futures::future::join(sub1.ready(), sub2.ready()).await;
    assert_eq!(transport.query_count(), 1);
    assert_eq!(snap1.data, snap2.data);
    assert_eq!(snap1.data, Some(json!(["a"])));
  }

  #[tokio::test]
  async fn distinct_args_fetch_independently() {
    let transport = MockTransport::with_response(json!([]));
    let client = CacheClient::new(transport.clone());

    let mut sub1 = client.query("orders/search", json!({"page": 1}), &[]);
    let mut sub2 = client.query("orders/search", json!({"page": 2}), &[]);
    sub1.ready().await;
    sub2.ready().await;

    assert_eq!(transport.query_count(), 2);
  }

  #[tokio::test]
  async fn mutation_refetches_subscribed_intersecting_entries() {
    let transport = MockTransport::with_response(json!(["old"]));
    let client = CacheClient::new(transport.clone());

    let mut sub = client.query("orders/search", json!({}), &["Orders"]);
    sub.ready().await;
    assert_eq!(transport.query_count(), 1);

    transport.set_response(json!(["new"]));
    client
      .mutate("orders/create", json!({"title": "x"}), &["Orders"])
      .await
      .unwrap();
    settle().await;

    assert_eq!(transport.query_count(), 2);
    let snap = sub.snapshot();
    assert_eq!(snap.data, Some(json!(["new"])));
    assert!(!snap.stale);
  }

  #[tokio::test]
  async fn mutation_with_disjoint_tags_changes_nothing() {
    let transport = MockTransport::with_response(json!([]));
    let client = CacheClient::new(transport.clone());

    let mut sub = client.query("orders/search", json!({}), &["Orders"]);
    sub.ready().await;

    client.mutate("users/create", json!({}), &["Users"]).await.unwrap();
    settle().await;

    assert_eq!(transport.query_count(), 1);
    assert!(!sub.snapshot().stale);
  }

  #[tokio::test]
  async fn failed_mutation_does_not_invalidate() {
    let transport = MockTransport::with_response(json!([]));
    let client = CacheClient::new(transport.clone());

    let mut sub = client.query("orders/search", json!({}), &["Orders"]);
    sub.ready().await;

    transport.fail_mutations.store(true, Ordering::SeqCst);
    let result = client.mutate("orders/create", json!({}), &["Orders"]).await;
    assert!(result.is_err());
    settle().await;

    assert_eq!(transport.query_count(), 1);
    assert!(!sub.snapshot().stale);
  }

  #[tokio::test]
  async fn unsubscribed_stale_entry_refetches_on_next_subscribe() {
    let transport = MockTransport::with_response(json!(["old"]));
    // Long grace period: the entry must survive unsubscription here.
    let client = CacheClient::with_grace_period(transport.clone(), Duration::from_secs(30));

    let mut sub = client.query("orders/search", json!({}), &["Orders"]);
    sub.ready().await;
    drop(sub);

    transport.set_response(json!(["new"]));
    client.mutate("orders/create", json!({}), &["Orders"]).await.unwrap();
    settle().await;

    // No subscribers: marked stale, not refetched.
    assert_eq!(transport.query_count(), 1);

    // Next subscription picks up the staleness and refetches. The stale
    // payload stays visible until the refetch lands.
    let sub = client.query("orders/search", json!({}), &["Orders"]);
    assert_eq!(sub.snapshot().data, Some(json!(["old"])));
    settle().await;

    assert_eq!(transport.query_count(), 2);
    assert_eq!(sub.snapshot().data, Some(json!(["new"])));
  }

  #[tokio::test]
  async fn eviction_waits_for_grace_period() {
    init_tracing();
    let transport = MockTransport::with_response(json!([]));
    let client = CacheClient::with_grace_period(transport.clone(), Duration::from_millis(60));

    let mut sub = client.query("orders/search", json!({}), &[]);
    sub.ready().await;
    drop(sub);

    // Within the grace period the entry is still alive and resubscribing
    // is a cache hit.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.entry_count(), 1);
    let sub = client.query("orders/search", json!({}), &[]);
    assert_eq!(sub.snapshot().status, EntryStatus::Fulfilled);
    assert_eq!(transport.query_count(), 1);
    drop(sub);

    // Left unsubscribed past the grace period, the entry is evicted and
    // the next subscription fetches again.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.entry_count(), 0);

    let mut sub = client.query("orders/search", json!({}), &[]);
    sub.ready().await;
    assert_eq!(transport.query_count(), 2);
  }

  #[tokio::test]
  async fn resubscription_cancels_pending_eviction() {
    let transport = MockTransport::with_response(json!([]));
    let client = CacheClient::with_grace_period(transport.clone(), Duration::from_millis(40));

    let mut sub = client.query("orders/search", json!({}), &[]);
    sub.ready().await;
    drop(sub);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let sub = client.query("orders/search", json!({}), &[]);

    // The old timer fires while we are subscribed again; it must not evict.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(client.entry_count(), 1);
    assert_eq!(sub.snapshot().status, EntryStatus::Fulfilled);
    assert_eq!(transport.query_count(), 1);
  }

  #[tokio::test]
  async fn rejected_entry_is_retried_on_demand_only() {
    let transport = MockTransport::with_response(json!(["ok"]));
    transport.fail_queries.store(true, Ordering::SeqCst);
    let client = CacheClient::new(transport.clone());

    let mut sub = client.query("orders/search", json!({}), &[]);
    let snap = sub.ready().await;
    assert_eq!(snap.status, EntryStatus::Rejected);
    assert_eq!(snap.error.as_ref().and_then(|e| e.status), Some(500));

    // The failure stays queryable; a new subscription does not auto-retry.
    let sub2 = client.query("orders/search", json!({}), &[]);
    assert_eq!(sub2.snapshot().status, EntryStatus::Rejected);
    settle().await;
    assert_eq!(transport.query_count(), 1);

    // An explicit retry issues exactly one new request.
    transport.fail_queries.store(false, Ordering::SeqCst);
    sub.retry();
    let _ = sub.changed().await;
    settle().await;

    let snap = sub.snapshot();
    assert_eq!(snap.status, EntryStatus::Fulfilled);
    assert_eq!(snap.data, Some(json!(["ok"])));
    assert_eq!(transport.query_count(), 2);
  }

  #[tokio::test]
  async fn mutation_during_flight_queues_followup_fetch() {
    let transport =
      MockTransport::with_response(json!(["old"])).with_delay(Duration::from_millis(40));
    let client = CacheClient::new(transport.clone());

    let mut sub = client.query("orders/search", json!({}), &["Orders"]);
    // Let the request reach the transport before invalidating.
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Invalidate while the initial request is still in flight. Only one
    // request per key may be outstanding, so the refetch is queued.
    client.mutate("orders/create", json!({}), &["Orders"]).await.unwrap();
    assert_eq!(transport.query_count(), 1);

    transport.set_response(json!(["new"]));
    sub.ready().await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(transport.query_count(), 2);
    let snap = sub.snapshot();
    assert_eq!(snap.data, Some(json!(["new"])));
    assert!(!snap.stale);
  }

  #[tokio::test]
  async fn invalidation_outlives_a_request_issued_before_it() {
    let transport =
      MockTransport::with_response(json!(["old"])).with_delay(Duration::from_millis(40));
    let client = CacheClient::with_grace_period(transport.clone(), Duration::from_secs(30));

    // Unsubscribe while the initial request is still in flight.
    let sub = client.query("orders/search", json!({}), &["Orders"]);
    tokio::time::sleep(Duration::from_millis(5)).await;
    drop(sub);

    client.mutate("orders/create", json!({}), &["Orders"]).await.unwrap();
    transport.set_response(json!(["new"]));

    // The pre-mutation response lands with no subscribers: it must not
    // wash out the stale mark, and nothing refetches yet.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(transport.query_count(), 1);

    let sub = client.query("orders/search", json!({}), &["Orders"]);
    let snap = sub.snapshot();
    assert!(snap.stale);
    assert_eq!(snap.data, Some(json!(["old"])));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(transport.query_count(), 2);
    let snap = sub.snapshot();
    assert_eq!(snap.data, Some(json!(["new"])));
    assert!(!snap.stale);
  }

  #[tokio::test]
  async fn subscriber_joining_mid_flight_sees_post_mutation_data() {
    let transport =
      MockTransport::with_response(json!(["old"])).with_delay(Duration::from_millis(40));
    let client = CacheClient::with_grace_period(transport.clone(), Duration::from_secs(30));

    let sub = client.query("orders/search", json!({}), &["Orders"]);
    tokio::time::sleep(Duration::from_millis(5)).await;
    drop(sub);

    client.mutate("orders/create", json!({}), &["Orders"]).await.unwrap();

    // Joins the in-flight request issued before the mutation; once that
    // response applies, a follow-up fetch must run for this subscriber.
    let sub = client.query("orders/search", json!({}), &["Orders"]);
    transport.set_response(json!(["new"]));
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(transport.query_count(), 2);
    let snap = sub.snapshot();
    assert_eq!(snap.data, Some(json!(["new"])));
    assert!(!snap.stale);
  }

  #[tokio::test]
  async fn aged_entry_refetches_on_new_subscription() {
    let transport = MockTransport::with_response(json!(["old"]));
    let client = CacheClient::with_timings(
      transport.clone(),
      Duration::from_secs(30),
      Duration::from_millis(30),
    );

    let mut sub = client.query("orders/search", json!({}), &["Orders"]);
    sub.ready().await;
    assert_eq!(transport.query_count(), 1);

    transport.set_response(json!(["new"]));
    tokio::time::sleep(Duration::from_millis(60)).await;

    // Aging alone never refetches behind a live subscription.
    assert_eq!(transport.query_count(), 1);

    // A new subscription past the stale time goes back to the network.
    let mut sub2 = client.query("orders/search", json!({}), &["Orders"]);
    sub2.ready().await;
    settle().await;
    assert_eq!(transport.query_count(), 2);
    assert_eq!(sub2.snapshot().data, Some(json!(["new"])));
  }
}
