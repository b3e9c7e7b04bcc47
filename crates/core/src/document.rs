//! Source document model: a record with a history of versioned revisions.
//!
//! Upstream records carry their data as a sequence of revisions keyed by
//! monotonic version stamps (epoch milliseconds). Payloads are schemaless
//! and carried verbatim, so they are modelled as ordered-key JSON maps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque record payload. Key order is preserved end to end.
pub type DataMap = Map<String, Value>;

/// One revision of a record's data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionData {
  /// Version stamp, epoch milliseconds.
  pub version: i64,
  /// Schemaless payload for this revision.
  pub data: DataMap,
}

/// A record drawn from the upstream document store.
///
/// `revisions` is ordered ascending by version and versions are unique;
/// feeders are responsible for upholding this. `data` is the legacy
/// versionless payload some upstream collections still carry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceDocument {
  pub id: i64,
  #[serde(default)]
  pub revisions: Vec<RevisionData>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<DataMap>,
}

impl SourceDocument {
  pub fn new(id: i64, revisions: Vec<RevisionData>) -> Self {
    Self {
      id,
      revisions,
      data: None,
    }
  }

  /// Version stamps in ascending order.
  pub fn versions(&self) -> impl Iterator<Item = i64> + '_ {
    self.revisions.iter().map(|revision| revision.version)
  }

  /// The newest version stamp, if any revision exists.
  pub fn latest_version(&self) -> Option<i64> {
    self.revisions.last().map(|revision| revision.version)
  }

  /// Walk the revisions paired with the version of the immediately
  /// following revision, `None` for the newest one.
  pub fn paired(&self) -> impl Iterator<Item = (&RevisionData, Option<i64>)> {
    let next = self
      .revisions
      .iter()
      .skip(1)
      .map(|revision| Some(revision.version))
      .chain(std::iter::once(None));
    self.revisions.iter().zip(next)
  }

  /// A document with data but no version history.
  pub fn is_versionless(&self) -> bool {
    self.revisions.is_empty() && self.data.is_some()
  }
}

/// What to do with a document that carries data but no version history.
///
/// Such records are never dropped silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionlessPolicy {
  /// Fail the document with an explicit error naming the record.
  #[default]
  Reject,
  /// Synthesize a single command stamped with version 0.
  Sentinel,
}
