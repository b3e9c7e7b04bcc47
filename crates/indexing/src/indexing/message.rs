//! Queue messages exchanged between the coordinator, the workers, and the
//! stats collector.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use strata_core::document::SourceDocument;

use crate::index::IndexPayload;

/// Work delivered to the worker pool. `Done` is the shutdown sentinel;
/// the coordinator posts one per worker.
#[derive(Debug)]
pub(crate) enum Feed {
  Document(SourceDocument),
  Done,
}

/// Per prefixed index, counts of each bulk result kind.
pub(crate) type OperationCounts = BTreeMap<String, BTreeMap<String, u64>>;

/// Summary a worker posts after draining its queue.
#[derive(Debug)]
pub(crate) struct WorkerResult {
  pub worker_id: usize,
  /// Commands submitted across all of this worker's flushes.
  pub command_count: u64,
  /// Every `meta.version` this worker emitted.
  pub seen_versions: BTreeSet<i64>,
  pub operations: OperationCounts,
}

/// Report from a worker that failed and exited without a result.
#[derive(Debug)]
pub(crate) struct WorkerFailure {
  pub worker_id: usize,
  pub message: String,
}

/// Classification batch handed to the stats collector.
#[derive(Debug)]
pub(crate) enum StatsMessage {
  Batch(StatsBatch),
  Done,
}

#[derive(Debug)]
pub(crate) struct StatsBatch {
  /// Unprefixed target index name.
  pub index: String,
  /// Record ids indexed for the first time.
  pub created: Vec<i64>,
  /// Record ids that already had revisions in the index.
  pub updated: Vec<i64>,
  /// Newest payload per record in the flushed batch.
  pub payloads: HashMap<i64, IndexPayload>,
}
