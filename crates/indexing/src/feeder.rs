//! Upstream document sources.

use futures::stream::{self, BoxStream};
use strata_core::document::SourceDocument;

/// A finite, ordered source of documents for one logical upstream
/// collection.
///
/// Feeders are single-reader: the coordinator consumes `documents` exactly
/// once. `total` only feeds progress reporting; a slight over-count is
/// tolerated, an under-count pushes the progress ratio above 1.0.
pub trait Feeder: Send {
  /// Name of the logical source collection, used in reports.
  fn collection(&self) -> &str;

  /// Expected number of documents.
  fn total(&self) -> u64;

  /// The document stream. Each record id appears at most once per run.
  fn documents(&mut self) -> BoxStream<'_, SourceDocument>;
}

/// Feeder over an in-memory batch of documents.
pub struct MemoryFeeder {
  collection: String,
  documents: Vec<SourceDocument>,
}

impl MemoryFeeder {
  pub fn new(collection: impl Into<String>, documents: Vec<SourceDocument>) -> Self {
    Self {
      collection: collection.into(),
      documents,
    }
  }
}

impl Feeder for MemoryFeeder {
  fn collection(&self) -> &str {
    &self.collection
  }

  fn total(&self) -> u64 {
    self.documents.len() as u64
  }

  fn documents(&mut self) -> BoxStream<'_, SourceDocument> {
    Box::pin(stream::iter(std::mem::take(&mut self.documents)))
  }
}
