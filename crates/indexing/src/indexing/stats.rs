//! Stats collector: drains per-batch classifications from the workers and
//! fans out per-record notifications off the indexing hot path.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::message::StatsMessage;
use crate::signal::Monitors;

/// Runs as a single cooperative task on the coordinator's context until
/// the sentinel arrives. Subscribers are invoked serially; cancellation
/// drains silently.
pub(crate) async fn stats_collector(mut rx: mpsc::Receiver<StatsMessage>, monitors: Monitors, cancel: CancellationToken) {
  let mut batches = 0u64;
  loop {
    tokio::select! {
      biased;

      _ = cancel.cancelled() => {
        while rx.try_recv().is_ok() {}
        trace!(batches, "stats collector cancelled");
        break;
      }

      message = rx.recv() => match message {
        Some(StatsMessage::Batch(batch)) => {
          batches += 1;
          for record_id in &batch.created {
            if let Some(payload) = batch.payloads.get(record_id) {
              monitors.record_created(&batch.index, *record_id, payload);
            }
          }
          for record_id in &batch.updated {
            if let Some(payload) = batch.payloads.get(record_id) {
              monitors.record_updated(&batch.index, *record_id, payload);
            }
          }
        }
        Some(StatsMessage::Done) | None => {
          debug!(batches, "stats collector finished");
          break;
        }
      }
    }
  }
}
