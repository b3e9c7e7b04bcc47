//! End-to-end pipeline tests against the in-memory cluster.

#[cfg(test)]
mod tests {
  use std::{sync::Arc, time::Duration};

  use pretty_assertions::assert_eq;
  use serde_json::json;
  use strata_core::document::{DataMap, SourceDocument, VersionlessPolicy};

  use crate::{
    index::Index,
    indexing::{
      Indexer, IndexingError,
      __tests__::helpers::{MockCluster, RecordingMonitor, document, feeder, test_config},
    },
  };

  fn indexer_with(
    cluster: &MockCluster,
    config: &strata_core::config::Config,
    pairs: Vec<(Box<dyn crate::feeder::Feeder>, Index)>,
    version: i64,
  ) -> (Indexer, Arc<RecordingMonitor>) {
    let monitor = Arc::new(RecordingMonitor::default());
    let mut indexer = Indexer::new(Arc::new(cluster.clone()), config, pairs, version);
    indexer.register_monitor(monitor.clone());
    (indexer, monitor)
  }

  /// Fresh index, two-revision record, clean insert end to end.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn fresh_index_is_clean_inserted() {
    let cluster = MockCluster::new();
    let config = test_config();
    let docs = vec![document(7, &[(10, json!({ "a": 1 })), (20, json!({ "a": 2 }))])];
    let (indexer, monitor) = indexer_with(
      &cluster,
      &config,
      vec![(feeder("records", docs), Index::new("test-", "records", 20))],
      20,
    );

    let report = indexer.run().await.expect("run should succeed");

    // Both revisions land under composite ids with their version windows.
    assert_eq!(cluster.doc_ids("test-records"), vec!["7:10", "7:20"]);
    let first = cluster.doc("test-records", "7:10").expect("first revision indexed");
    assert_eq!(first["meta"]["version"], json!(10));
    assert_eq!(first["meta"]["versions"], json!({ "gte": 10, "lt": 20 }));
    assert_eq!(first["meta"]["next_version"], json!(20));
    let second = cluster.doc("test-records", "7:20").expect("second revision indexed");
    assert_eq!(second["meta"]["versions"], json!({ "gte": 20 }));
    assert!(second["meta"].get("next_version").is_none());

    // Clean insert: no reconciliation against the target.
    {
      let state = cluster.state();
      assert!(state.delete_calls.is_empty());
      assert_eq!(state.existing_queries, 0);
      assert_eq!(
        state.refresh_calls,
        vec![
          ("test-records".to_string(), Some("-1".to_string())),
          ("test-records".to_string(), None),
        ]
      );
    }

    assert_eq!(monitor.created_ids(), vec![7]);
    assert!(monitor.updated_ids().is_empty());
    assert_eq!(monitor.events().finished, vec![(1, 2)]);

    assert_eq!(report.version, 20);
    assert_eq!(report.versions, vec![10, 20]);
    assert_eq!(report.sources, vec!["records".to_string()]);
    assert_eq!(report.targets, vec!["test-records".to_string()]);
    assert_eq!(report.operations["test-records"]["created"], 2);

    // Status recorded for the completed run, keyed by the prefixed name.
    let status = cluster.doc("status", "test-records").expect("status upserted");
    assert_eq!(
      status,
      json!({ "name": "records", "index_name": "test-records", "latest_version": 20 })
    );
  }

  /// A record that already has revisions is pre-deleted, reindexed, and
  /// classified as updated.
  #[tokio::test]
  async fn existing_records_are_reconciled() {
    let cluster = MockCluster::new();
    cluster.seed_index("test-records", &[("7:5", 7), ("7:10", 7)]);
    let config = test_config();
    let docs = vec![document(7, &[(10, json!({ "a": 1 })), (20, json!({ "a": 2 }))])];
    let (indexer, monitor) = indexer_with(
      &cluster,
      &config,
      vec![(feeder("records", docs), Index::new("test-", "records", 20))],
      20,
    );

    indexer.run().await.expect("run should succeed");

    // Prior revisions are gone, replaced by exactly the current set.
    assert_eq!(cluster.doc_ids("test-records"), vec!["7:10", "7:20"]);
    {
      let state = cluster.state();
      assert_eq!(state.delete_calls, vec![("test-records".to_string(), vec![7])]);
      assert_eq!(state.existing_queries, 1);
      assert_eq!(
        state.refresh_calls,
        vec![
          ("test-records".to_string(), Some("30s".to_string())),
          ("test-records".to_string(), None),
        ]
      );
    }
    assert_eq!(monitor.updated_ids(), vec![7]);
    assert!(monitor.created_ids().is_empty());
  }

  /// Bulk boundary: flushes at the bulk size plus a residual on the
  /// sentinel; every revision survives and the counts add up.
  #[tokio::test]
  async fn bulk_boundary_flushes_and_residual() {
    let cluster = MockCluster::new();
    let mut config = test_config();
    config.indexing.pool_size = 1;
    let docs = vec![
      document(1, &[(10, json!({})), (20, json!({})), (30, json!({}))]),
      document(2, &[(10, json!({})), (20, json!({})), (30, json!({}))]),
      document(3, &[(10, json!({})), (20, json!({})), (30, json!({}))]),
    ];
    let (indexer, monitor) = indexer_with(
      &cluster,
      &config,
      vec![(feeder("records", docs), Index::new("test-", "records", 30))],
      30,
    );

    let report = indexer.run().await.expect("run should succeed");

    assert_eq!(cluster.doc_ids("test-records").len(), 9);
    // 3 + 3 = 6 commands trip the size-4 threshold, then 3 drain on the
    // sentinel.
    assert_eq!(cluster.state().bulk_calls, 2);

    let (_, command_count) = monitor.events().finished[0];
    assert_eq!(command_count, 9);
    let submitted: u64 = report.operations["test-records"].values().sum();
    assert_eq!(submitted, command_count);
  }

  /// First worker failure aborts the run: feed stops early, the refresh
  /// interval is restored, and neither aliases nor statuses are touched.
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn worker_error_aborts_the_run() {
    let cluster = MockCluster::new();
    cluster.fail_bulks();
    let mut config = test_config();
    config.indexing.pool_size = 1;
    config.indexing.bulk_size = 1;
    config.indexing.queue_capacity = 4;
    let docs: Vec<SourceDocument> = (0..500).map(|id| document(id, &[(10, json!({}))])).collect();
    let (indexer, monitor) = indexer_with(
      &cluster,
      &config,
      vec![(feeder("records", docs), Index::new("test-", "records", 10))],
      10,
    );

    let error = indexer.run().await.expect_err("run should fail");
    assert!(matches!(&error, IndexingError::Worker(_)));
    assert!(error.to_string().contains("bulk submission rejected"));

    {
      let state = cluster.state();
      // Cleanup still ran.
      assert_eq!(
        state.refresh_calls.last(),
        Some(&("test-records".to_string(), None))
      );
      // No alias or status side effects on failure.
      assert!(state.alias_actions.is_empty());
      assert!(!state.indexes.contains_key("status"));
    }
    // The feed stopped once the failure surfaced.
    assert!(monitor.events().progress.len() < 500);
    assert!(monitor.events().finished.is_empty());
  }

  /// Two pairs sharing one index: the clean snapshot is taken once, so
  /// the second pair still clean-inserts even though the first wrote.
  #[tokio::test]
  async fn shared_index_pairs_keep_the_clean_snapshot() {
    let cluster = MockCluster::new();
    let config = test_config();
    let index = Index::new("test-", "records", 20);
    let (indexer, monitor) = indexer_with(
      &cluster,
      &config,
      vec![
        (feeder("batch-a", vec![document(1, &[(10, json!({}))])]), index.clone()),
        (feeder("batch-b", vec![document(2, &[(20, json!({}))])]), index),
      ],
      20,
    );

    let report = indexer.run().await.expect("run should succeed");

    assert_eq!(cluster.doc_ids("test-records"), vec!["1:10", "2:20"]);
    {
      let state = cluster.state();
      assert!(state.delete_calls.is_empty());
      assert_eq!(state.existing_queries, 0);
      // One refresh cycle per pair, both in clean-insert mode.
      assert_eq!(
        state.refresh_calls,
        vec![
          ("test-records".to_string(), Some("-1".to_string())),
          ("test-records".to_string(), None),
          ("test-records".to_string(), Some("-1".to_string())),
          ("test-records".to_string(), None),
        ]
      );
    }
    assert_eq!(monitor.created_ids(), vec![1, 2]);
    assert!(monitor.updated_ids().is_empty());
    assert_eq!(report.sources, vec!["batch-a".to_string(), "batch-b".to_string()]);
    assert_eq!(report.targets, vec!["test-records".to_string()]);
  }

  /// The report collects the union of observed versions and all source
  /// collections across pairs.
  #[tokio::test]
  async fn report_collects_versions_and_sources() {
    let cluster = MockCluster::new();
    let config = test_config();
    let (indexer, _monitor) = indexer_with(
      &cluster,
      &config,
      vec![
        (
          feeder("specimens", vec![document(1, &[(10, json!({})), (30, json!({}))])]),
          Index::new("test-", "specimens", 30),
        ),
        (
          feeder("cards", vec![document(2, &[(20, json!({}))])]),
          Index::new("test-", "cards", 30),
        ),
      ],
      30,
    );

    let report = indexer.run().await.expect("run should succeed");

    assert_eq!(report.versions, vec![10, 20, 30]);
    assert_eq!(report.sources, vec!["cards".to_string(), "specimens".to_string()]);
    assert_eq!(
      report.targets,
      vec!["test-cards".to_string(), "test-specimens".to_string()]
    );
    assert_eq!(report.operations["test-specimens"]["created"], 2);
    assert_eq!(report.operations["test-cards"]["created"], 1);
  }

  /// An empty feeder terminates promptly: sentinels reach every worker.
  #[tokio::test]
  async fn empty_feeder_completes_promptly() {
    let cluster = MockCluster::new();
    let config = test_config();
    let (indexer, monitor) = indexer_with(
      &cluster,
      &config,
      vec![(feeder("records", Vec::new()), Index::new("test-", "records", 10))],
      10,
    );

    let report = tokio::time::timeout(Duration::from_secs(5), indexer.run())
      .await
      .expect("run should not hang")
      .expect("run should succeed");

    assert!(report.operations.is_empty());
    assert!(report.versions.is_empty());
    assert_eq!(monitor.events().finished, vec![(0, 0)]);
  }

  /// A versionless document is an explicit failure under the default
  /// policy.
  #[tokio::test]
  async fn versionless_document_fails_the_run_by_default() {
    let cluster = MockCluster::new();
    let config = test_config();
    let mut versionless = SourceDocument::new(9, Vec::new());
    versionless.data = Some(DataMap::new());
    let (indexer, _monitor) = indexer_with(
      &cluster,
      &config,
      vec![(feeder("records", vec![versionless]), Index::new("test-", "records", 10))],
      10,
    );

    let error = indexer.run().await.expect_err("run should fail");
    assert!(error.to_string().contains("record 9"));
    assert!(error.to_string().contains("no version history"));
  }

  /// The sentinel policy stamps versionless documents with version 0.
  #[tokio::test]
  async fn versionless_sentinel_policy_indexes_version_zero() {
    let cluster = MockCluster::new();
    let mut config = test_config();
    config.indexing.versionless = VersionlessPolicy::Sentinel;
    let mut versionless = SourceDocument::new(9, Vec::new());
    let mut data = DataMap::new();
    data.insert("a".to_string(), json!("x"));
    versionless.data = Some(data);
    let (indexer, _monitor) = indexer_with(
      &cluster,
      &config,
      vec![(feeder("records", vec![versionless]), Index::new("test-", "records", 10))],
      10,
    );

    let report = indexer.run().await.expect("run should succeed");

    assert_eq!(cluster.doc_ids("test-records"), vec!["9:0"]);
    let doc = cluster.doc("test-records", "9:0").expect("sentinel revision indexed");
    assert_eq!(doc["meta"]["version"], json!(0));
    assert_eq!(report.versions, vec![0]);
  }

  /// With status updates disabled the status index is still ensured but
  /// stays empty.
  #[tokio::test]
  async fn status_updates_can_be_disabled() {
    let cluster = MockCluster::new();
    let mut config = test_config();
    config.indexing.update_status = false;
    let (indexer, _monitor) = indexer_with(
      &cluster,
      &config,
      vec![(
        feeder("records", vec![document(1, &[(10, json!({}))])]),
        Index::new("test-", "records", 10),
      )],
      10,
    );

    indexer.run().await.expect("run should succeed");

    let state = cluster.state();
    let status = state.indexes.get("status").expect("status index ensured");
    assert!(status.docs.is_empty());
  }

  /// With stats signalling disabled nothing is classified and no
  /// per-record notifications fire, but reconciliation still happens.
  #[tokio::test]
  async fn stats_can_be_disabled() {
    let cluster = MockCluster::new();
    cluster.seed_index("test-records", &[("7:5", 7)]);
    let mut config = test_config();
    config.indexing.signal_stats = false;
    let (indexer, monitor) = indexer_with(
      &cluster,
      &config,
      vec![(
        feeder("records", vec![document(7, &[(10, json!({}))])]),
        Index::new("test-", "records", 10),
      )],
      10,
    );

    indexer.run().await.expect("run should succeed");

    {
      let state = cluster.state();
      assert_eq!(state.existing_queries, 0);
      assert_eq!(state.delete_calls.len(), 1);
    }
    assert!(monitor.created_ids().is_empty());
    assert!(monitor.updated_ids().is_empty());
  }

  /// The current alias is repointed at the run version after success.
  #[tokio::test]
  async fn current_alias_tracks_the_run_version() {
    let cluster = MockCluster::new();
    let config = test_config();
    let (indexer, _monitor) = indexer_with(
      &cluster,
      &config,
      vec![(
        feeder("records", vec![document(1, &[(10, json!({}))])]),
        Index::new("test-", "records", 10),
      )],
      10,
    );

    indexer.run().await.expect("run should succeed");

    let state = cluster.state();
    assert_eq!(state.alias_actions.len(), 2);
    assert_eq!(
      state.alias_actions[0],
      json!({
        "remove": {
          "index": "test-records",
          "alias": "test-records-current"
        }
      })
    );
    assert_eq!(
      state.alias_actions[1],
      json!({
        "add": {
          "index": "test-records",
          "alias": "test-records-current",
          "filter": { "term": { "meta.versions": 10 } }
        }
      })
    );
  }

  /// Indexing the same corpus twice converges on identical contents, with
  /// the second pass classified as updates.
  #[tokio::test]
  async fn rerun_converges_on_identical_contents() {
    let cluster = MockCluster::new();
    let config = test_config();
    let docs = || vec![document(7, &[(10, json!({ "a": 1 })), (20, json!({ "a": 2 }))])];

    let (first, first_monitor) = indexer_with(
      &cluster,
      &config,
      vec![(feeder("records", docs()), Index::new("test-", "records", 20))],
      20,
    );
    first.run().await.expect("first run should succeed");
    let after_first = cluster.doc_ids("test-records");
    assert_eq!(first_monitor.created_ids(), vec![7]);

    let (second, second_monitor) = indexer_with(
      &cluster,
      &config,
      vec![(feeder("records", docs()), Index::new("test-", "records", 20))],
      20,
    );
    second.run().await.expect("second run should succeed");

    assert_eq!(cluster.doc_ids("test-records"), after_first);
    assert_eq!(second_monitor.updated_ids(), vec![7]);
    assert!(second_monitor.created_ids().is_empty());
  }
}
