use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub state: StateConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the REST backend, e.g. `https://api.example.com/v1`
  pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds an unsubscribed cache entry survives before eviction
  #[serde(default = "default_grace_period_secs")]
  pub grace_period_secs: u64,
  /// Seconds a fulfilled entry stays fresh; older entries refetch on the
  /// next subscription
  #[serde(default = "default_stale_secs")]
  pub stale_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      grace_period_secs: default_grace_period_secs(),
      stale_secs: default_stale_secs(),
    }
  }
}

fn default_grace_period_secs() -> u64 {
  60
}

fn default_stale_secs() -> u64 {
  300
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateConfig {
  /// Path to the view-state database (defaults to the platform data dir)
  pub db_path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./qsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/qsync/config.yaml
  /// 4. ~/.config/qsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/qsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("qsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("qsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Eviction grace period as a [`Duration`].
  pub fn grace_period(&self) -> Duration {
    Duration::from_secs(self.cache.grace_period_secs)
  }

  /// Entry stale time as a [`Duration`].
  pub fn stale_time(&self) -> Duration {
    Duration::from_secs(self.cache.stale_secs)
  }
}
