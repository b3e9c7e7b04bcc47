//! The indexing pipeline: coordinator, worker pool, and stats collector.
//!
//! ```text
//! Coordinator ──(document queue, bounded)──▶ Worker × P ──▶ cluster _bulk
//!      ▲                                       │
//!      ├──(result queue)───────────────────────┤
//!      ├──(error queue)────────────────────────┤
//!      └─▶ Stats Collector ◀──(stats queue)────┘
//! ```
//!
//! Pairs run sequentially; within a pair the feeder, the worker pool, and
//! the stats collector run concurrently. The error queue is polled at
//! every coordinator blocking point so a failed worker can never stall
//! shutdown.

mod indexer;
mod message;
mod report;
mod stats;
mod worker;


pub use indexer::{Indexer, IndexingError};
pub use report::{IndexStatus, IndexingReport};
