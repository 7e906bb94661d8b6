//! Shared foundational types used across the kiln incremental build cache.
//!
//! This crate provides content digests, schema version digests for
//! ordinal-indexed persisted records, and the path codec used to store
//! portable paths.

#![warn(missing_docs)]

pub mod hash;
pub mod path;
pub mod version;

pub use hash::{ContentDigest, DIGEST_LEN};
pub use path::{PathCodec, PathKind, RootedPathCodec};
pub use version::{digest_of_names, schema_version_digest, SchemaEnum};
