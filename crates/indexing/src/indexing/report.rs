//! End-of-run reporting types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

/// Aggregate outcome of one indexing run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexingReport {
  /// Version upper bound of the run.
  pub version: i64,
  /// Every version observed in emitted commands, ascending.
  pub versions: Vec<i64>,
  /// Distinct feeder collection names, sorted.
  pub sources: Vec<String>,
  /// Distinct prefixed target index names, sorted.
  pub targets: Vec<String>,
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
  pub duration_seconds: f64,
  /// Per prefixed index, counts of each bulk result kind.
  pub operations: BTreeMap<String, BTreeMap<String, u64>>,
}

/// Status document upserted into the status index, keyed by the prefixed
/// index name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
  /// Unprefixed index name.
  pub name: String,
  /// Prefixed index name, also the document id.
  pub index_name: String,
  /// Version of the last successfully completed run.
  pub latest_version: i64,
}

impl IndexStatus {
  pub(crate) fn as_document(&self) -> Value {
    json!({
      "name": self.name,
      "index_name": self.index_name,
      "latest_version": self.latest_version,
    })
  }
}
