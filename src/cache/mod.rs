//! Server-cache layer for deduplicated, tag-invalidated network reads.
//!
//! This module provides a backend-agnostic request cache that:
//! - Keys entries by a hash of `(endpoint, serialized args)`
//! - Issues at most one in-flight request per key (join-on-dedup)
//! - Invalidates entries by set intersection over declared tags
//! - Refcounts subscribers and evicts only after a grace period

mod entry;
mod key;
mod layer;

pub use entry::{EntrySnapshot, EntryStatus};
pub use key::cache_key;
pub use layer::{CacheClient, Subscription};
