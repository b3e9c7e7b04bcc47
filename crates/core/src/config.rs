//! Configuration for strata, TOML-backed with full defaults.
//!
//! Every field has a default so a missing or partial config file is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::document::VersionlessPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub cluster: ClusterConfig,
  pub indexing: IndexingConfig,
}

impl Config {
  /// Load configuration from a TOML file.
  pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_str(&raw)
  }

  /// Parse configuration from a TOML string.
  #[allow(clippy::should_implement_trait)]
  pub fn from_str(raw: &str) -> Result<Self, ConfigError> {
    Ok(toml::from_str(raw)?)
  }
}

// ============================================================================
// Search Cluster
// ============================================================================

/// Connection parameters for the search cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
  /// Base URL of the cluster.
  pub url: String,

  /// Prefix prepended to every target index name.
  pub index_prefix: String,

  /// Name of the auxiliary index recording the last completed version per
  /// target index.
  pub status_index_name: String,

  /// Request timeout for cluster calls, in seconds.
  pub request_timeout_secs: u64,
}

impl Default for ClusterConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:9200".to_string(),
      index_prefix: String::new(),
      status_index_name: "status".to_string(),
      request_timeout_secs: 60,
    }
  }
}

// ============================================================================
// Indexing Pipeline
// ============================================================================

/// Tuning knobs for one indexing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
  /// Worker pool size per (feeder, index) pair. 0 means one worker per CPU.
  pub pool_size: usize,

  /// Number of buffered commands a worker submits per bulk request.
  pub bulk_size: usize,

  /// Document queue capacity. Feeders block when workers lag behind.
  pub queue_capacity: usize,

  /// Stats queue capacity. Slow subscribers backpressure workers through
  /// this bound.
  pub stats_queue_capacity: usize,

  /// Upsert per-index status documents at the end of a successful run.
  pub update_status: bool,

  /// Classify records as created/updated and notify subscribers.
  pub signal_stats: bool,

  /// Handling of documents that carry data but no version history.
  pub versionless: VersionlessPolicy,
}

impl Default for IndexingConfig {
  fn default() -> Self {
    Self {
      pool_size: 0,
      bulk_size: 1000,
      queue_capacity: 100,
      stats_queue_capacity: 10,
      update_status: true,
      signal_stats: true,
      versionless: VersionlessPolicy::default(),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("failed to parse config: {0}")]
  Parse(#[from] toml::de::Error),
}
