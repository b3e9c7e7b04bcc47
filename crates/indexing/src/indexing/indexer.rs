//! Coordinator for an indexing run.
//!
//! Owns the (feeder, index) pairs, the queues, and one worker pool per
//! pair. Pairs run sequentially to bound per-index contention; within a
//! pair the feeder, `P` workers, and the stats collector run concurrently.

use std::{
  collections::{BTreeSet, HashMap, HashSet},
  mem,
  sync::Arc,
  time::Duration,
};

use chrono::Utc;
use serde_json::{Value, json};
use strata_core::config::Config;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use futures::StreamExt;

use super::{
  message::{Feed, OperationCounts, StatsMessage, WorkerFailure, WorkerResult},
  report::{IndexStatus, IndexingReport},
  stats::stats_collector,
  worker::{Worker, WorkerConfig},
};
use crate::{
  cluster::{ClusterError, SearchCluster},
  feeder::Feeder,
  index::{DOC_TYPE, Index},
  signal::{DocumentProgress, IndexingMonitor, Monitors},
};

/// Cadence of timed queue reads, so the error queue stays checkable while
/// the coordinator waits.
const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Refresh interval while clean-inserting.
const REFRESH_DISABLED: &str = "-1";
/// Refresh interval while updating an index that already has documents.
const REFRESH_BULK: &str = "30s";

#[derive(Debug, thiserror::Error)]
pub enum IndexingError {
  /// A worker reported a failure; carries the first error's description.
  #[error("indexing failed: {0}")]
  Worker(String),
  #[error(transparent)]
  Cluster(#[from] ClusterError),
  #[error("indexing run cancelled")]
  Cancelled,
}

type SharedFeed = Arc<Mutex<mpsc::Receiver<Feed>>>;

/// Orchestrates one indexing run over a list of (feeder, index) pairs.
pub struct Indexer {
  cluster: Arc<dyn SearchCluster>,
  pairs: Vec<(Box<dyn Feeder>, Index)>,
  pool_size: usize,
  bulk_size: usize,
  queue_capacity: usize,
  stats_queue_capacity: usize,
  update_status: bool,
  signal_stats: bool,
  status_index_name: String,
  version: i64,
  monitors: Monitors,
  cancel: CancellationToken,
}

impl Indexer {
  /// `version` is the run's upper bound; it stamps the status documents
  /// and the final report.
  pub fn new(
    cluster: Arc<dyn SearchCluster>,
    config: &Config,
    pairs: Vec<(Box<dyn Feeder>, Index)>,
    version: i64,
  ) -> Self {
    let pool_size = if config.indexing.pool_size == 0 {
      num_cpus::get()
    } else {
      config.indexing.pool_size
    };
    let pairs = pairs
      .into_iter()
      .map(|(feeder, index)| (feeder, index.with_versionless_policy(config.indexing.versionless)))
      .collect();

    Self {
      cluster,
      pairs,
      pool_size,
      bulk_size: config.indexing.bulk_size,
      queue_capacity: config.indexing.queue_capacity,
      stats_queue_capacity: config.indexing.stats_queue_capacity,
      update_status: config.indexing.update_status,
      signal_stats: config.indexing.signal_stats,
      status_index_name: config.cluster.status_index_name.clone(),
      version,
      monitors: Monitors::default(),
      cancel: CancellationToken::new(),
    }
  }

  pub fn register_monitor(&mut self, monitor: Arc<dyn IndexingMonitor>) {
    self.monitors.register(monitor);
  }

  /// Token observed by every task of the run. Cancelling it terminates
  /// workers quietly and drains the stats collector.
  pub fn cancellation_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Run the pipeline to completion and return the report.
  ///
  /// On the first worker failure the remaining documents are discarded,
  /// the pool is signalled to stop, and the error surfaces here; the
  /// refresh-interval restore still runs, the alias and status updates do
  /// not.
  pub async fn run(mut self) -> Result<IndexingReport, IndexingError> {
    let start = Utc::now();
    let mut pairs = mem::take(&mut self.pairs);
    let indexes = distinct_indexes(&pairs);
    let sources: BTreeSet<String> = pairs.iter().map(|(feeder, _)| feeder.collection().to_string()).collect();
    info!(
      pairs = pairs.len(),
      indexes = indexes.len(),
      workers = self.pool_size,
      version = self.version,
      "indexing run starting"
    );

    self.define_indexes(&indexes).await?;

    let document_total: u64 = pairs.iter().map(|(feeder, _)| feeder.total()).sum();
    // Snapshot taken once per run: a later pair targeting the same index
    // still sees the value observed here.
    let clean_indexes = self.snapshot_clean_indexes(&indexes).await?;

    let (stats_tx, collector) = if self.signal_stats {
      let (tx, rx) = mpsc::channel(self.stats_queue_capacity);
      let handle = tokio::spawn(stats_collector(rx, self.monitors.clone(), self.cancel.clone()));
      (Some(tx), Some(handle))
    } else {
      (None, None)
    };

    let mut aggregates = RunAggregates::default();
    let mut outcome = Ok(());
    for (feeder, index) in pairs.iter_mut() {
      let clean_insert = clean_indexes.get(index.name()).copied().unwrap_or(false);
      if let Err(e) = self
        .run_pair(feeder, index, clean_insert, stats_tx.as_ref(), document_total, &mut aggregates)
        .await
      {
        outcome = Err(e);
        break;
      }
    }

    if let Some(tx) = stats_tx {
      let _ = tx.send(StatsMessage::Done).await;
    }
    if let Some(handle) = collector {
      let _ = handle.await;
    }

    outcome?;

    self.update_aliases(&indexes).await?;
    self.update_statuses(&indexes).await?;

    let end = Utc::now();
    let report = IndexingReport {
      version: self.version,
      versions: aggregates.seen_versions.iter().copied().collect(),
      sources: sources.into_iter().collect(),
      targets: indexes
        .iter()
        .map(|index| index.name().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect(),
      start,
      end,
      duration_seconds: (end - start).num_milliseconds() as f64 / 1000.0,
      operations: aggregates.operations,
    };
    info!(
      documents = aggregates.document_count,
      commands = aggregates.command_count,
      duration_seconds = report.duration_seconds,
      "indexing run finished"
    );
    self
      .monitors
      .finished(aggregates.document_count, aggregates.command_count, &report);
    Ok(report)
  }

  /// Create every target index that does not exist yet. Pre-existing
  /// indices are left untouched; mappings are immutable after creation.
  async fn define_indexes(&self, indexes: &[Index]) -> Result<(), IndexingError> {
    for index in indexes {
      if !self.cluster.index_exists(index.name()).await? {
        info!(index = index.name(), "creating index");
        self.cluster.create_index(index.name(), &index.creation_body()).await?;
      }
    }
    Ok(())
  }

  async fn snapshot_clean_indexes(&self, indexes: &[Index]) -> Result<HashMap<String, bool>, IndexingError> {
    let mut clean = HashMap::new();
    for index in indexes {
      let count = self.cluster.count(index.name()).await?;
      clean.insert(index.name().to_string(), count == 0);
    }
    Ok(clean)
  }

  async fn run_pair(
    &self,
    feeder: &mut Box<dyn Feeder>,
    index: &Index,
    clean_insert: bool,
    stats_tx: Option<&mpsc::Sender<StatsMessage>>,
    document_total: u64,
    aggregates: &mut RunAggregates,
  ) -> Result<(), IndexingError> {
    info!(
      source = feeder.collection(),
      index = index.name(),
      clean_insert,
      "pair starting"
    );

    let (feed_tx, feed_rx) = mpsc::channel(self.queue_capacity);
    let feed_rx: SharedFeed = Arc::new(Mutex::new(feed_rx));
    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    let (error_tx, mut error_rx) = mpsc::unbounded_channel();

    for worker_id in 0..self.pool_size {
      let worker = Worker::new(
        WorkerConfig {
          worker_id,
          bulk_size: self.bulk_size,
          clean_insert,
        },
        index.clone(),
        self.cluster.worker_client()?,
        stats_tx.cloned(),
      );
      tokio::spawn(worker.run(
        feed_rx.clone(),
        result_tx.clone(),
        error_tx.clone(),
        self.cancel.clone(),
      ));
    }
    drop(result_tx);
    drop(error_tx);

    let interval = if clean_insert { REFRESH_DISABLED } else { REFRESH_BULK };
    self.cluster.set_refresh_interval(index.name(), Some(interval)).await?;

    let outcome = self
      .drive_pair(
        feeder.as_mut(),
        index,
        &feed_tx,
        &feed_rx,
        &mut result_rx,
        &mut error_rx,
        document_total,
        aggregates,
      )
      .await;

    // Restore the refresh interval whether the pair succeeded or not.
    let restored = self.cluster.set_refresh_interval(index.name(), None).await;
    match (outcome, restored) {
      (Err(e), restored) => {
        if let Err(restore_error) = restored {
          warn!(index = index.name(), error = %restore_error, "failed to restore refresh interval");
        }
        Err(e)
      }
      (Ok(()), Err(restore_error)) => Err(restore_error.into()),
      (Ok(()), Ok(())) => Ok(()),
    }
  }

  #[allow(clippy::too_many_arguments)]
  async fn drive_pair(
    &self,
    feeder: &mut dyn Feeder,
    index: &Index,
    feed_tx: &mpsc::Sender<Feed>,
    feed_rx: &SharedFeed,
    result_rx: &mut mpsc::UnboundedReceiver<WorkerResult>,
    error_rx: &mut mpsc::UnboundedReceiver<WorkerFailure>,
    document_total: u64,
    aggregates: &mut RunAggregates,
  ) -> Result<(), IndexingError> {
    let source = feeder.collection().to_string();

    {
      let mut documents = feeder.documents();
      while let Some(document) = documents.next().await {
        aggregates.document_count += 1;
        self.monitors.about_to_index(&DocumentProgress {
          document: &document,
          source: &source,
          index: index.name(),
          document_count: aggregates.document_count,
          command_count: aggregates.command_count,
          document_total,
        });
        if let Some(failure) = self.post(feed_tx, error_rx, Feed::Document(document)).await? {
          return self.abort_pair(feed_rx, feed_tx, failure).await;
        }
      }
    }

    for _ in 0..self.pool_size {
      if let Some(failure) = self.post(feed_tx, error_rx, Feed::Done).await? {
        return self.abort_pair(feed_rx, feed_tx, failure).await;
      }
    }

    // Timed reads so a failed pool can never stall shutdown.
    let mut completed = 0usize;
    while completed < self.pool_size {
      if let Ok(failure) = error_rx.try_recv() {
        return self.abort_pair(feed_rx, feed_tx, failure).await;
      }
      match tokio::time::timeout(POLL_INTERVAL, result_rx.recv()).await {
        Ok(Some(result)) => {
          debug!(
            worker_id = result.worker_id,
            commands = result.command_count,
            "worker completed"
          );
          completed += 1;
          aggregates.fold(result);
        }
        // Every result sender is gone; failures, if any, sit on the error
        // queue and are picked up below.
        Ok(None) => break,
        Err(_) => {
          if self.cancel.is_cancelled() {
            return Err(IndexingError::Cancelled);
          }
        }
      }
    }
    if let Ok(failure) = error_rx.try_recv() {
      return self.abort_pair(feed_rx, feed_tx, failure).await;
    }
    if self.cancel.is_cancelled() {
      return Err(IndexingError::Cancelled);
    }

    info!(source = %source, index = index.name(), "pair complete");
    Ok(())
  }

  /// Blocking put with the error queue polled while waiting. Returns the
  /// failure to escalate, if one arrived.
  async fn post(
    &self,
    feed_tx: &mpsc::Sender<Feed>,
    error_rx: &mut mpsc::UnboundedReceiver<WorkerFailure>,
    item: Feed,
  ) -> Result<Option<WorkerFailure>, IndexingError> {
    loop {
      if let Ok(failure) = error_rx.try_recv() {
        return Ok(Some(failure));
      }
      if self.cancel.is_cancelled() {
        return Err(IndexingError::Cancelled);
      }
      match tokio::time::timeout(POLL_INTERVAL, feed_tx.reserve()).await {
        Ok(Ok(permit)) => {
          permit.send(item);
          return Ok(None);
        }
        // The coordinator holds the receiver, so the channel cannot close
        // while a pair is running.
        Ok(Err(_)) => return Ok(None),
        Err(_) => continue,
      }
    }
  }

  /// Error-driven shutdown: discard the queued documents, post sentinels
  /// so the surviving workers stop, and surface the first failure.
  async fn abort_pair(
    &self,
    feed_rx: &SharedFeed,
    feed_tx: &mpsc::Sender<Feed>,
    failure: WorkerFailure,
  ) -> Result<(), IndexingError> {
    error!(worker_id = failure.worker_id, error = %failure.message, "worker failed; aborting pair");
    {
      let mut rx = feed_rx.lock().await;
      while rx.try_recv().is_ok() {}
    }
    for _ in 0..self.pool_size {
      if feed_tx.try_send(Feed::Done).is_err() {
        break;
      }
    }
    Err(IndexingError::Worker(failure.message))
  }

  /// Repoint every index's current alias at the run's version window.
  async fn update_aliases(&self, indexes: &[Index]) -> Result<(), IndexingError> {
    let actions: Vec<Value> = indexes
      .iter()
      .flat_map(|index| index.alias_operations(self.version))
      .collect();
    if actions.is_empty() {
      return Ok(());
    }
    debug!(actions = actions.len(), "updating current aliases");
    self.cluster.update_aliases(&actions).await?;
    Ok(())
  }

  /// Record `version` as the last completed run per target index. Runs
  /// only after full success, so a partial failure leaves the previous
  /// status in place as the recovery signal.
  async fn update_statuses(&self, indexes: &[Index]) -> Result<(), IndexingError> {
    if !self.cluster.index_exists(&self.status_index_name).await? {
      self
        .cluster
        .create_index(&self.status_index_name, &status_index_body())
        .await?;
    }
    if !self.update_status {
      return Ok(());
    }
    for index in indexes {
      let status = IndexStatus {
        name: index.unprefixed_name().to_string(),
        index_name: index.name().to_string(),
        latest_version: self.version,
      };
      debug!(index = index.name(), version = self.version, "updating status");
      self
        .cluster
        .upsert(&self.status_index_name, index.name(), &status.as_document())
        .await?;
    }
    Ok(())
  }
}

#[derive(Default)]
struct RunAggregates {
  document_count: u64,
  command_count: u64,
  seen_versions: BTreeSet<i64>,
  operations: OperationCounts,
}

impl RunAggregates {
  fn fold(&mut self, result: WorkerResult) {
    self.command_count += result.command_count;
    self.seen_versions.extend(result.seen_versions);
    for (index_name, kinds) in result.operations {
      let entry = self.operations.entry(index_name).or_default();
      for (kind, count) in kinds {
        *entry.entry(kind).or_default() += count;
      }
    }
  }
}

fn distinct_indexes(pairs: &[(Box<dyn Feeder>, Index)]) -> Vec<Index> {
  let mut seen = HashSet::new();
  pairs
    .iter()
    .filter(|(_, index)| seen.insert(index.name().to_string()))
    .map(|(_, index)| index.clone())
    .collect()
}

fn status_index_body() -> Value {
  json!({
    "settings": {
      "number_of_shards": 1,
      "number_of_replicas": 1
    },
    "mappings": {
      (DOC_TYPE): {
        "properties": {
          "name": { "type": "keyword" },
          "index_name": { "type": "keyword" },
          "latest_version": { "type": "date", "format": "epoch_millis" }
        }
      }
    }
  })
}
