//! Store configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::error::StoreError;
use crate::staleness::DEFAULT_STALE_AFTER_MINUTES;

/// Order applied to a fetched collection, keyed on the record's
/// modification time.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  /// Most recently updated first.
  #[default]
  Descending,
  Ascending,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Maximum number of entries in the record cache.
  pub cache_capacity: usize,
  /// Minutes before a fetched collection is considered stale.
  pub stale_after_minutes: i64,
  /// Order of the collection after a full fetch.
  pub sort: SortOrder,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      cache_capacity: DEFAULT_CACHE_CAPACITY,
      stale_after_minutes: DEFAULT_STALE_AFTER_MINUTES,
      sort: SortOrder::default(),
    }
  }
}

impl StoreConfig {
  /// The staleness window as a duration.
  pub fn stale_after(&self) -> chrono::Duration {
    chrono::Duration::minutes(self.stale_after_minutes)
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (missing file is an error)
  /// 2. ./notestore.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/notestore/config.yaml
  ///
  /// Falls back to the defaults when no file exists.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self, StoreError> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(StoreError::Config {
          reason: format!("config file not found: {}", p.display()),
        });
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("notestore.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("notestore").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self, StoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| StoreError::Config {
      reason: format!("failed to read config file {}: {}", path.display(), e),
    })?;

    serde_yaml::from_str(&contents).map_err(|e| StoreError::Config {
      reason: format!("failed to parse config file {}: {}", path.display(), e),
    })
  }
}
