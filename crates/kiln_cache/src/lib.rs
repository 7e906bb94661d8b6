//! Persistent state for incremental builds.
//!
//! Two stores live next to every build target:
//!
//! - the source state store ([`SourceStateStore`]), a columnar snapshot of
//!   every source file with its content digest and produced outputs, saved
//!   atomically and diffed against the current file digests on load;
//! - the target stats store ([`TargetStatsStore`]), a small key-value log
//!   holding the configuration digest and long-lived build statistics.
//!
//! Both guard their records with schema version digests so that a layout
//! change invalidates old state instead of misreading it.

#![warn(missing_docs)]

pub mod columnar;
pub mod config_digest;
pub mod error;
pub mod heuristic;
pub mod kv;
pub mod source_state;
pub mod stats;
pub mod target_stats;

pub use config_digest::{ConfigurationCategory, ConfigurationDigestContainer};
pub use error::CacheError;
pub use heuristic::RebuildHeuristic;
pub use kv::{KeyValueLog, PutDecision};
pub use source_state::{
    source_state_metadata, LoadStateResult, RemovedFileInfo, SourceDescriptor, SourceStateStore,
};
pub use stats::{TargetStateContainer, TargetStatistic};
pub use target_stats::TargetStatsStore;
