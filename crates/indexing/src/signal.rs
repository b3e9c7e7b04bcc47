//! Observer fan-out for indexing progress and per-record notifications.
//!
//! Subscribers are invoked serially, never on a worker task: progress from
//! the coordinator, created/updated from the stats collector. A slow
//! subscriber therefore only backpressures through the bounded stats
//! queue instead of stalling bulk throughput.

use std::sync::Arc;

use strata_core::document::SourceDocument;

use crate::{index::IndexPayload, indexing::IndexingReport};

/// Progress snapshot fired before a document is queued for indexing.
#[derive(Debug, Clone)]
pub struct DocumentProgress<'a> {
  pub document: &'a SourceDocument,
  /// Logical source collection.
  pub source: &'a str,
  /// Prefixed target index name.
  pub index: &'a str,
  pub document_count: u64,
  pub command_count: u64,
  pub document_total: u64,
}

impl DocumentProgress<'_> {
  /// Fraction of the expected documents handled so far. Not clamped: an
  /// under-counting feeder pushes this above 1.0.
  pub fn ratio(&self) -> f64 {
    if self.document_total == 0 {
      return 1.0;
    }
    self.document_count as f64 / self.document_total as f64
  }
}

/// Subscriber interface. Methods default to no-ops so implementations
/// handle only the notifications they care about.
pub trait IndexingMonitor: Send + Sync {
  /// Fired before the coordinator queues a document.
  fn about_to_index(&self, _progress: &DocumentProgress<'_>) {}

  /// Fired post-index for a record seen for the first time. `record` is
  /// the newest payload of the record in its batch.
  fn record_created(&self, _index: &str, _record_id: i64, _record: &IndexPayload) {}

  /// Fired post-index for a record that was already present.
  fn record_updated(&self, _index: &str, _record_id: i64, _record: &IndexPayload) {}

  /// Fired once at the end of a successful run.
  fn finished(&self, _document_count: u64, _command_count: u64, _report: &IndexingReport) {}
}

/// Registered subscribers. Dispatch is serial, in registration order.
#[derive(Clone, Default)]
pub struct Monitors {
  subscribers: Vec<Arc<dyn IndexingMonitor>>,
}

impl Monitors {
  pub fn register(&mut self, monitor: Arc<dyn IndexingMonitor>) {
    self.subscribers.push(monitor);
  }

  pub fn is_empty(&self) -> bool {
    self.subscribers.is_empty()
  }

  pub(crate) fn about_to_index(&self, progress: &DocumentProgress<'_>) {
    for subscriber in &self.subscribers {
      subscriber.about_to_index(progress);
    }
  }

  pub(crate) fn record_created(&self, index: &str, record_id: i64, record: &IndexPayload) {
    for subscriber in &self.subscribers {
      subscriber.record_created(index, record_id, record);
    }
  }

  pub(crate) fn record_updated(&self, index: &str, record_id: i64, record: &IndexPayload) {
    for subscriber in &self.subscribers {
      subscriber.record_updated(index, record_id, record);
    }
  }

  pub(crate) fn finished(&self, document_count: u64, command_count: u64, report: &IndexingReport) {
    for subscriber in &self.subscribers {
      subscriber.finished(document_count, command_count, report);
    }
  }
}
