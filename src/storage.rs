//! Durable key-value storage for persisted view state.
//!
//! The store only needs `get`/`set` over strings, so the trait stays small
//! and backends are interchangeable: SQLite for real sessions, an in-memory
//! map for tests and ephemeral runs.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Trait for durable key-value storage backends.
///
/// Writes are best-effort from the store's point of view: a failed `set`
/// is logged and swallowed, the in-memory state stays authoritative.
pub trait StateStorage: Send + Sync {
  /// Read the raw value stored under `key`, if any.
  fn get(&self, key: &str) -> Result<Option<String>>;

  /// Write `value` under `key`, replacing any previous value.
  fn set(&self, key: &str, value: &str) -> Result<()>;
}

impl<S: StateStorage + ?Sized> StateStorage for Arc<S> {
  fn get(&self, key: &str) -> Result<Option<String>> {
    (**self).get(key)
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    (**self).set(key, value)
  }
}

/// In-memory storage backend. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStorage {
  map: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl StateStorage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let map = self
      .map
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(map.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let mut map = self
      .map
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    map.insert(key.to_string(), value.to_string());
    Ok(())
  }
}

/// SQLite-based storage backend.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for the view-state table.
const STATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS view_state (
    view_key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStorage {
  /// Open the storage at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create state directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open state database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open the storage at an explicit path.
  pub fn open_at(path: &std::path::Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create state directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open state database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open an in-memory database, mainly for tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("qsync").join("state.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STATE_SCHEMA)
      .map_err(|e| eyre!("Failed to run state migrations: {}", e))?;

    Ok(())
  }
}

impl StateStorage for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT data FROM view_state WHERE view_key = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let result: Option<String> = stmt.query_row(params![key], |row| row.get(0)).ok();
    Ok(result)
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO view_state (view_key, data, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to store view state: {}", e))?;

    Ok(())
  }
}
