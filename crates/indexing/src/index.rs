//! Target index definition and bulk command synthesis.
//!
//! An [`Index`] knows its prefixed name, the version bound of the current
//! run, and how to turn a source document's revision history into bulk
//! command pairs whose ids and time-range metadata let revisions coexist
//! in one index while staying individually addressable.

use serde::Serialize;
use serde_json::{Value, json};
use strata_core::document::{DataMap, SourceDocument, VersionlessPolicy};

/// Fixed document type. The parameter is deprecated upstream but still
/// required on the wire.
pub const DOC_TYPE: &str = "_doc";

/// Version stamp used for versionless documents under
/// [`VersionlessPolicy::Sentinel`].
pub const SENTINEL_VERSION: i64 = 0;

// ============================================================================
// Wire Types
// ============================================================================

/// One logical index operation: an action line and its payload line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkCommand {
  pub action: BulkAction,
  pub payload: IndexPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkAction {
  pub index: ActionTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionTarget {
  /// Composite revision id, `"<record_id>:<version>"`.
  #[serde(rename = "_id")]
  pub id: String,
  /// Prefixed index name.
  #[serde(rename = "_index")]
  pub index: String,
  #[serde(rename = "_type")]
  pub doc_type: String,
}

/// The document body indexed for one revision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexPayload {
  /// Verbatim record data.
  pub data: DataMap,
  pub meta: PayloadMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadMeta {
  pub version: i64,
  pub versions: VersionRange,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub next_version: Option<i64>,
}

/// Validity window of a revision: `gte` is its own version, `lt` the next
/// revision's version, absent for the newest revision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionRange {
  pub gte: i64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub lt: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
  #[error("record {record_id} has data but no version history")]
  VersionlessRecord { record_id: i64 },
}

// ============================================================================
// Index
// ============================================================================

/// A target index in the search cluster and the rules for synthesizing
/// bulk commands into it.
#[derive(Debug, Clone)]
pub struct Index {
  unprefixed_name: String,
  name: String,
  version: i64,
  versionless: VersionlessPolicy,
}

impl Index {
  pub fn new(prefix: &str, name: &str, version: i64) -> Self {
    Self {
      unprefixed_name: name.to_string(),
      name: format!("{prefix}{name}"),
      version,
      versionless: VersionlessPolicy::default(),
    }
  }

  pub fn with_versionless_policy(mut self, policy: VersionlessPolicy) -> Self {
    self.versionless = policy;
    self
  }

  /// Prefixed index name, as addressed on the cluster.
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn unprefixed_name(&self) -> &str {
    &self.unprefixed_name
  }

  /// Upper version bound of the current indexing run.
  pub fn version(&self) -> i64 {
    self.version
  }

  /// Alias through which the newest revisions are queried.
  pub fn current_alias(&self) -> String {
    format!("{}-current", self.name)
  }

  /// Synthesize one bulk command per revision, ascending by version.
  ///
  /// The last command is always the newest revision; callers rely on that
  /// when tracking the latest payload per record.
  pub fn commands(&self, document: &SourceDocument) -> Result<Vec<BulkCommand>, CommandError> {
    if document.is_versionless() {
      return match self.versionless {
        VersionlessPolicy::Reject => Err(CommandError::VersionlessRecord {
          record_id: document.id,
        }),
        VersionlessPolicy::Sentinel => {
          let data = document.data.clone().unwrap_or_default();
          Ok(vec![self.command(document.id, SENTINEL_VERSION, data, None)])
        }
      };
    }

    Ok(
      document
        .paired()
        .map(|(revision, next_version)| {
          self.command(document.id, revision.version, revision.data.clone(), next_version)
        })
        .collect(),
    )
  }

  fn command(&self, record_id: i64, version: i64, data: DataMap, next_version: Option<i64>) -> BulkCommand {
    BulkCommand {
      action: BulkAction {
        index: ActionTarget {
          id: format!("{record_id}:{version}"),
          index: self.name.clone(),
          doc_type: DOC_TYPE.to_string(),
        },
      },
      payload: IndexPayload {
        data,
        meta: PayloadMeta {
          version,
          versions: VersionRange {
            gte: version,
            lt: next_version,
          },
          next_version,
        },
      },
    }
  }

  /// Mapping body sent when the index is first created.
  ///
  /// `meta.versions` is a date range over epoch milliseconds so a
  /// point-in-time query is a single-field range predicate; every `data.*`
  /// field is indexed as text with a lowercase keyword subfield and copied
  /// into the `meta.all` catch-all.
  pub fn creation_body(&self) -> Value {
    json!({
      "settings": {
        "analysis": {
          "normalizer": {
            "lowercase_normalizer": {
              "type": "custom",
              "char_filter": [],
              "filter": ["lowercase"]
            }
          }
        }
      },
      "mappings": {
        (DOC_TYPE): {
          "properties": {
            "meta.versions": {
              "type": "date_range",
              "format": "epoch_millis"
            },
            "meta.version": {
              "type": "date",
              "format": "epoch_millis"
            },
            "meta.next_version": {
              "type": "date",
              "format": "epoch_millis"
            },
            "meta.all": {
              "type": "text"
            }
          },
          "dynamic_templates": [
            {
              "standard_field": {
                "path_match": "data.*",
                "mapping": {
                  "type": "text",
                  "fields": {
                    "keyword": {
                      "type": "keyword",
                      "normalizer": "lowercase_normalizer",
                      // 256 is the standard limit in elasticsearch
                      "ignore_above": 256
                    }
                  },
                  "copy_to": "meta.all"
                }
              }
            }
          ]
        }
      }
    })
  }

  /// Alias actions repointing the current alias at the revisions whose
  /// validity window contains `latest_version`: a remove of the existing
  /// binding paired with the add of the new one, applied in a single
  /// atomic aliases call.
  pub fn alias_operations(&self, latest_version: i64) -> Vec<Value> {
    let alias = self.current_alias();
    vec![
      json!({
        "remove": {
          "index": self.name,
          "alias": alias
        }
      }),
      json!({
        "add": {
          "index": self.name,
          "alias": alias,
          "filter": {
            "term": {
              "meta.versions": latest_version
            }
          }
        }
      }),
    ]
  }
}
