//! Search cluster abstraction.
//!
//! The pipeline only needs a narrow slice of the cluster API, expressed
//! here as an object-safe trait so tests can substitute an in-memory
//! implementation. [`ElasticCluster`] is the HTTP implementation.

mod elastic;

use std::{collections::HashSet, sync::Arc};

use serde_json::Value;

pub use self::elastic::ElasticCluster;
use crate::index::BulkCommand;

#[async_trait::async_trait]
pub trait SearchCluster: Send + Sync {
  async fn index_exists(&self, index: &str) -> Result<bool, ClusterError>;

  async fn create_index(&self, index: &str, body: &Value) -> Result<(), ClusterError>;

  /// Number of documents currently in the index. 0 for a missing index.
  async fn count(&self, index: &str) -> Result<u64, ClusterError>;

  /// Record ids among `ids` that already have at least one revision in the
  /// index, matched on the `data._id` field.
  async fn existing_record_ids(&self, index: &str, ids: &[i64]) -> Result<HashSet<i64>, ClusterError>;

  /// Remove every indexed revision of the given records.
  async fn delete_by_query(&self, index: &str, ids: &[i64]) -> Result<(), ClusterError>;

  /// Submit command pairs as a single bulk request.
  async fn bulk(&self, commands: &[BulkCommand]) -> Result<BulkResponse, ClusterError>;

  /// Index a document under an explicit id, replacing any previous one.
  async fn upsert(&self, index: &str, id: &str, document: &Value) -> Result<(), ClusterError>;

  /// Set the index refresh interval. `None` restores the server default.
  async fn set_refresh_interval(&self, index: &str, interval: Option<&str>) -> Result<(), ClusterError>;

  /// Apply alias actions atomically.
  async fn update_aliases(&self, actions: &[Value]) -> Result<(), ClusterError>;

  /// A private handle for one worker: its own connection, compression
  /// disabled so bulk throughput is not spent on response decoding.
  fn worker_client(&self) -> Result<Arc<dyn SearchCluster>, ClusterError>;
}

/// Parsed bulk response.
#[derive(Debug, Clone)]
pub struct BulkResponse {
  /// Top-level error flag; any failed item sets it.
  pub errors: bool,
  pub items: Vec<BulkItem>,
  /// Full response body, kept for error surfaces.
  pub raw: Value,
}

/// One `(index, result)` pair from a bulk response item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
  /// Prefixed index name the operation landed in.
  pub index: String,
  /// Result kind reported by the cluster: `created`, `updated`, `noop`, ...
  pub result: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("failed to encode request body: {0}")]
  Encode(#[from] serde_json::Error),
  #[error("cluster returned {status}: {body}")]
  Response { status: u16, body: String },
  #[error("unexpected cluster response: {0}")]
  Malformed(String),
}
