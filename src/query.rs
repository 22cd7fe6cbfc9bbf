//! Query descriptor types for list views.
//!
//! A [`QueryDescriptor`] captures everything a list view needs to ask the
//! backend for one page of results: pagination, per-field filters, sort
//! directions and an optional reporting period. Descriptors are serialized
//! with serde_json both for persistence (see [`crate::store`]) and as the
//! request arguments sent through the cache layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Pagination window. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offset {
  /// Page size
  pub count: u32,
  /// 1-based page number
  pub page: u32,
}

impl Default for Offset {
  fn default() -> Self {
    Self { count: 10, page: 1 }
  }
}

/// Sort direction for a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
  Asc,
  Desc,
}

/// Inclusive date range for period filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
  pub date_start: DateTime<Utc>,
  pub date_end: DateTime<Utc>,
}

impl Period {
  /// Period covering the current UTC day, midnight to end of day.
  pub fn today() -> Self {
    let today = Utc::now().date_naive();
    let date_start = today.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
    let date_end = today.and_hms_opt(23, 59, 59).unwrap_or_default().and_utc();
    Self {
      date_start,
      date_end,
    }
  }
}

/// Filter, pagination and sort state for one list view.
///
/// Filter values are opaque to the sync layer; their shape varies per entity
/// and is only interpreted by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
  #[serde(default)]
  pub offset: Offset,
  #[serde(default)]
  pub filter: BTreeMap<String, Value>,
  #[serde(default)]
  pub sorts: BTreeMap<String, SortDirection>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub period: Option<Period>,
}

impl QueryDescriptor {
  /// Whether the descriptor honors the pagination invariants.
  ///
  /// A persisted descriptor that fails this check is treated the same as
  /// malformed JSON: the store falls back to the caller's default.
  pub fn is_valid(&self) -> bool {
    self.offset.count >= 1 && self.offset.page >= 1
  }

  /// Return a copy with the page number replaced.
  pub fn with_page(mut self, page: u32) -> Self {
    self.offset.page = page;
    self
  }
}
