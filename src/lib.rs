//! Query-state synchronization and server-cache layer for list-view
//! driven applications.
//!
//! Three cooperating pieces:
//!
//! - [`store::QueryStore`] holds one [`query::QueryDescriptor`] per list
//!   view (filters, pagination, sorts, optional period), persisted through
//!   a durable key-value port and reloaded on start.
//! - [`cache::CacheClient`] executes network reads keyed by
//!   `(endpoint, args)`, deduplicates concurrent identical requests,
//!   invalidates cached entries by tag intersection on successful
//!   mutations, and garbage-collects unsubscribed entries after a grace
//!   period.
//! - [`binding::ViewBinding`] ties the two together: query-state changes
//!   re-issue the cache query, cache changes surface for re-render.
//!
//! # Example
//!
//! ```ignore
//! let config = Config::load(None)?;
//! let (store, cache) = qsync::bootstrap(&config)?;
//!
//! let mut binding = ViewBinding::bind(
//!     &store, &cache, "orders", "orders/search",
//!     QueryDescriptor::default(), &["Orders"],
//! );
//!
//! loop {
//!     match binding.changed().await {
//!         BindingEvent::DataChanged => render(binding.data()),
//!         BindingEvent::QueryChanged => {}
//!         BindingEvent::Closed => break,
//!     }
//! }
//! ```

pub mod binding;
pub mod cache;
pub mod config;
pub mod query;
pub mod storage;
pub mod store;
pub mod transport;

pub use binding::{BindingEvent, ViewBinding};
pub use cache::{CacheClient, EntrySnapshot, EntryStatus, Subscription};
pub use config::Config;
pub use query::{Offset, Period, QueryDescriptor, SortDirection};
pub use storage::{MemoryStorage, SqliteStorage, StateStorage};
pub use store::QueryStore;
pub use transport::{FetchError, HttpTransport, Transport};

use color_eyre::Result;

/// Build a store and cache client from configuration: SQLite-backed view
/// state and an HTTP transport rooted at the configured base URL.
pub fn bootstrap(config: &Config) -> Result<(QueryStore<SqliteStorage>, CacheClient<HttpTransport>)> {
  let storage = match &config.state.db_path {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  };

  let transport = HttpTransport::new(&config.server.base_url)?;
  let cache = CacheClient::with_timings(transport, config.grace_period(), config.stale_time());

  Ok((QueryStore::new(storage), cache))
}
