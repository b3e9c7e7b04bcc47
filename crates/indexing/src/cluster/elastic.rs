//! Elasticsearch HTTP implementation of [`SearchCluster`].

use std::{collections::HashSet, sync::Arc, time::Duration};

use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use serde_json::{Value, json};
use strata_core::config::ClusterConfig;
use tracing::{debug, trace, warn};

use super::{BulkItem, BulkResponse, ClusterError, SearchCluster};
use crate::index::{BulkCommand, DOC_TYPE};

pub struct ElasticCluster {
  config: ClusterConfig,
  base: String,
  client: Client,
}

impl ElasticCluster {
  pub fn new(config: &ClusterConfig) -> Result<Self, ClusterError> {
    let client = Client::builder()
      .no_gzip()
      .timeout(Duration::from_secs(config.request_timeout_secs))
      .build()?;

    Ok(Self {
      config: config.clone(),
      base: config.url.trim_end_matches('/').to_string(),
      client,
    })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/{}", self.base, path)
  }

  /// Reject non-2xx responses, keeping the body for the error surface.
  async fn checked(&self, response: reqwest::Response) -> Result<reqwest::Response, ClusterError> {
    if !response.status().is_success() {
      let status = response.status();
      let body = response.text().await.unwrap_or_default();
      warn!(status = %status, body = %body, "cluster request failed");
      return Err(ClusterError::Response {
        status: status.as_u16(),
        body,
      });
    }
    Ok(response)
  }
}

#[async_trait::async_trait]
impl SearchCluster for ElasticCluster {
  async fn index_exists(&self, index: &str) -> Result<bool, ClusterError> {
    let response = self.client.head(self.url(index)).send().await?;
    match response.status() {
      StatusCode::NOT_FOUND => Ok(false),
      status if status.is_success() => Ok(true),
      status => {
        let body = response.text().await.unwrap_or_default();
        Err(ClusterError::Response {
          status: status.as_u16(),
          body,
        })
      }
    }
  }

  async fn create_index(&self, index: &str, body: &Value) -> Result<(), ClusterError> {
    debug!(index, "creating index");
    let response = self.client.put(self.url(index)).json(body).send().await?;
    self.checked(response).await?;
    Ok(())
  }

  async fn count(&self, index: &str) -> Result<u64, ClusterError> {
    let response = self.client.get(self.url(&format!("{index}/_count"))).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Ok(0);
    }
    let raw: Value = self.checked(response).await?.json().await?;
    raw
      .get("count")
      .and_then(Value::as_u64)
      .ok_or_else(|| ClusterError::Malformed(format!("count response without a count field: {raw}")))
  }

  async fn existing_record_ids(&self, index: &str, ids: &[i64]) -> Result<HashSet<i64>, ClusterError> {
    if ids.is_empty() {
      return Ok(HashSet::new());
    }
    let body = json!({
      "size": ids.len(),
      "_source": ["data._id"],
      "query": { "terms": { "data._id": ids } }
    });
    let response = self
      .client
      .post(self.url(&format!("{index}/_search")))
      .json(&body)
      .send()
      .await?;
    let raw: Value = self.checked(response).await?.json().await?;

    let hits = raw
      .pointer("/hits/hits")
      .and_then(Value::as_array)
      .ok_or_else(|| ClusterError::Malformed(format!("search response without hits: {raw}")))?;
    Ok(hits.iter().filter_map(record_id_of_hit).collect())
  }

  async fn delete_by_query(&self, index: &str, ids: &[i64]) -> Result<(), ClusterError> {
    if ids.is_empty() {
      return Ok(());
    }
    trace!(index, records = ids.len(), "deleting prior revisions");
    let body = json!({ "query": { "terms": { "data._id": ids } } });
    let response = self
      .client
      .post(self.url(&format!("{index}/_delete_by_query")))
      .json(&body)
      .send()
      .await?;
    self.checked(response).await?;
    Ok(())
  }

  async fn bulk(&self, commands: &[BulkCommand]) -> Result<BulkResponse, ClusterError> {
    let mut body = String::new();
    for command in commands {
      body.push_str(&serde_json::to_string(&command.action)?);
      body.push('\n');
      body.push_str(&serde_json::to_string(&command.payload)?);
      body.push('\n');
    }

    let response = self
      .client
      .post(self.url("_bulk"))
      .header(CONTENT_TYPE, "application/x-ndjson")
      .body(body)
      .send()
      .await?;
    let raw: Value = self.checked(response).await?.json().await?;
    parse_bulk_response(raw)
  }

  async fn upsert(&self, index: &str, id: &str, document: &Value) -> Result<(), ClusterError> {
    let response = self
      .client
      .put(self.url(&format!("{index}/{DOC_TYPE}/{id}")))
      .json(document)
      .send()
      .await?;
    self.checked(response).await?;
    Ok(())
  }

  async fn set_refresh_interval(&self, index: &str, interval: Option<&str>) -> Result<(), ClusterError> {
    debug!(index, interval = interval.unwrap_or("default"), "setting refresh interval");
    let body = json!({ "index": { "refresh_interval": interval } });
    let response = self
      .client
      .put(self.url(&format!("{index}/_settings")))
      .json(&body)
      .send()
      .await?;
    self.checked(response).await?;
    Ok(())
  }

  async fn update_aliases(&self, actions: &[Value]) -> Result<(), ClusterError> {
    let body = json!({ "actions": actions });
    let response = self.client.post(self.url("_aliases")).json(&body).send().await?;
    self.checked(response).await?;
    Ok(())
  }

  fn worker_client(&self) -> Result<Arc<dyn SearchCluster>, ClusterError> {
    Ok(Arc::new(Self::new(&self.config)?))
  }
}

fn record_id_of_hit(hit: &Value) -> Option<i64> {
  let id = hit.pointer("/_source/data/_id")?;
  // Upstream stores may hold the record id as a number or a string.
  id.as_i64().or_else(|| id.as_str().and_then(|s| s.parse().ok()))
}

pub(crate) fn parse_bulk_response(raw: Value) -> Result<BulkResponse, ClusterError> {
  let errors = raw
    .get("errors")
    .and_then(Value::as_bool)
    .ok_or_else(|| ClusterError::Malformed(format!("bulk response without an errors flag: {raw}")))?;

  let mut items = Vec::new();
  if let Some(raw_items) = raw.get("items").and_then(Value::as_array) {
    for item in raw_items {
      // Each item is an object with a single action key.
      let Some(info) = item.as_object().and_then(|obj| obj.values().next()) else {
        continue;
      };
      let index = info
        .get("_index")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
      let result = info
        .get("result")
        .and_then(Value::as_str)
        .unwrap_or("error")
        .to_string();
      items.push(BulkItem { index, result });
    }
  }

  Ok(BulkResponse { errors, items, raw })
}
