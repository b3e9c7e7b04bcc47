//! Indexing worker: consumes source documents, synthesizes bulk commands,
//! batches them, reconciles prior revisions, and submits to the cluster.
//!
//! Workers share one document receiver and run until they take a sentinel
//! (or the queue closes). Within a worker the pre-delete for a batch
//! always completes before its bulk submission; across workers no order
//! is guaranteed, which is safe because a feeder emits each record id at
//! most once per run and batch id sets are therefore disjoint.

use std::{
  collections::{BTreeSet, HashMap},
  mem,
  sync::Arc,
};

use strata_core::document::SourceDocument;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::message::{Feed, OperationCounts, StatsBatch, StatsMessage, WorkerFailure, WorkerResult};
use crate::{
  cluster::{ClusterError, SearchCluster},
  index::{BulkCommand, CommandError, Index, IndexPayload},
};

/// Static configuration for one worker.
#[derive(Debug, Clone)]
pub(crate) struct WorkerConfig {
  pub worker_id: usize,
  /// Buffered commands per bulk submission.
  pub bulk_size: usize,
  /// The target index held zero documents when the run began; skip the
  /// reconciliation steps.
  pub clean_insert: bool,
}

#[derive(Debug, thiserror::Error)]
enum WorkerError {
  #[error("cancelled")]
  Cancelled,
  #[error("command synthesis failed: {0}")]
  Command(#[from] CommandError),
  #[error("cluster call failed: {0}")]
  Cluster(#[from] ClusterError),
  #[error("bulk submission rejected: {0}")]
  BulkRejected(String),
  #[error("stats collector is gone")]
  StatsClosed,
}

pub(crate) struct Worker {
  config: WorkerConfig,
  index: Index,
  cluster: Arc<dyn SearchCluster>,
  stats_tx: Option<mpsc::Sender<StatsMessage>>,

  buffer: Vec<BulkCommand>,
  /// Newest payload per record in the current batch.
  id_buffer: HashMap<i64, IndexPayload>,
  seen_versions: BTreeSet<i64>,
  command_count: u64,
  operations: OperationCounts,
}

impl Worker {
  pub(crate) fn new(
    config: WorkerConfig,
    index: Index,
    cluster: Arc<dyn SearchCluster>,
    stats_tx: Option<mpsc::Sender<StatsMessage>>,
  ) -> Self {
    Self {
      config,
      index,
      cluster,
      stats_tx,
      buffer: Vec::new(),
      id_buffer: HashMap::new(),
      seen_versions: BTreeSet::new(),
      command_count: 0,
      operations: OperationCounts::new(),
    }
  }

  /// Run until the queue is exhausted. Posts a summary on success, an
  /// error string on failure, nothing when cancelled. Never retries.
  pub(crate) async fn run(
    mut self,
    feed: Arc<Mutex<mpsc::Receiver<Feed>>>,
    results: mpsc::UnboundedSender<WorkerResult>,
    errors: mpsc::UnboundedSender<WorkerFailure>,
    cancel: CancellationToken,
  ) {
    let worker_id = self.config.worker_id;
    trace!(worker_id, index = self.index.name(), "worker starting");

    match self.process(&feed, &cancel).await {
      Ok(result) => {
        trace!(worker_id, commands = result.command_count, "worker finished");
        let _ = results.send(result);
      }
      Err(WorkerError::Cancelled) => {
        trace!(worker_id, "worker cancelled");
      }
      Err(error) => {
        let _ = errors.send(WorkerFailure {
          worker_id,
          message: error.to_string(),
        });
      }
    }
  }

  async fn process(
    &mut self,
    feed: &Arc<Mutex<mpsc::Receiver<Feed>>>,
    cancel: &CancellationToken,
  ) -> Result<WorkerResult, WorkerError> {
    loop {
      let message = {
        let mut rx = feed.lock().await;
        tokio::select! {
          biased;
          _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
          message = rx.recv() => message,
        }
      };

      match message {
        Some(Feed::Document(document)) => self.handle(document).await?,
        Some(Feed::Done) | None => break,
      }
    }

    self.flush().await?;
    Ok(WorkerResult {
      worker_id: self.config.worker_id,
      command_count: self.command_count,
      seen_versions: mem::take(&mut self.seen_versions),
      operations: mem::take(&mut self.operations),
    })
  }

  async fn handle(&mut self, document: SourceDocument) -> Result<(), WorkerError> {
    let commands = self.index.commands(&document)?;
    let Some(last) = commands.last() else {
      return Ok(());
    };

    // The newest revision wins the id-buffer slot for this record.
    self.id_buffer.insert(document.id, last.payload.clone());
    for command in &commands {
      self.seen_versions.insert(command.payload.meta.version);
    }
    self.buffer.extend(commands);

    if self.buffer.len() >= self.config.bulk_size {
      self.flush().await?;
    }
    Ok(())
  }

  /// Submit the buffered commands: classify the batch against the target,
  /// remove the prior revisions of every record in it, then bulk-index.
  async fn flush(&mut self) -> Result<(), WorkerError> {
    if self.buffer.is_empty() {
      return Ok(());
    }

    let commands = mem::take(&mut self.buffer);
    let payloads = mem::take(&mut self.id_buffer);
    let ids: Vec<i64> = payloads.keys().copied().collect();
    self.command_count += commands.len() as u64;
    debug!(
      worker_id = self.config.worker_id,
      commands = commands.len(),
      records = ids.len(),
      "flushing batch"
    );

    let classification = if self.stats_tx.is_some() {
      Some(self.classify(&ids).await?)
    } else {
      None
    };

    if !self.config.clean_insert {
      self.cluster.delete_by_query(self.index.name(), &ids).await?;
    }

    let response = self.cluster.bulk(&commands).await?;
    if response.errors {
      return Err(WorkerError::BulkRejected(response.raw.to_string()));
    }
    for item in &response.items {
      let kinds = self.operations.entry(item.index.clone()).or_default();
      *kinds.entry(item.result.clone()).or_default() += 1;
    }

    if let (Some(tx), Some((created, updated))) = (&self.stats_tx, classification) {
      let batch = StatsBatch {
        index: self.index.unprefixed_name().to_string(),
        created,
        updated,
        payloads,
      };
      tx.send(StatsMessage::Batch(batch))
        .await
        .map_err(|_| WorkerError::StatsClosed)?;
    }
    Ok(())
  }

  /// Partition the batch's record ids into created (first seen) and
  /// updated (already present in the target index). On a clean insert
  /// everything is created and the index is never queried.
  async fn classify(&self, ids: &[i64]) -> Result<(Vec<i64>, Vec<i64>), WorkerError> {
    if self.config.clean_insert {
      return Ok((ids.to_vec(), Vec::new()));
    }
    let existing = self.cluster.existing_record_ids(self.index.name(), ids).await?;
    let (updated, created): (Vec<i64>, Vec<i64>) = ids.iter().copied().partition(|id| existing.contains(id));
    Ok((created, updated))
  }
}
