//! Parsing and validation of `kiln.toml` configuration files.
//!
//! This crate reads the optional project configuration and resolves, per
//! target, where incremental state is stored and which roots stored paths
//! are relative to.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, load_config_or_default, CONFIG_FILE};
pub use resolve::{resolve_target, ResolvedTarget};
pub use types::*;
