pub mod config;
pub mod document;

pub use config::{ClusterConfig, Config, ConfigError, IndexingConfig};
pub use document::{RevisionData, SourceDocument, VersionlessPolicy};
