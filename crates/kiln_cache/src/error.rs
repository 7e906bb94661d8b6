//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur while reading or writing incremental build state.
///
/// Callers that supply a [`DiagnosticSink`](kiln_diagnostics::DiagnosticSink)
/// to the loaders see most of these degrade into a full rebuild instead.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing state files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// A state file has an invalid or missing header.
    #[error("invalid state file header in {path}: {reason}")]
    InvalidHeader {
        /// The state file path.
        path: PathBuf,
        /// Description of the header problem.
        reason: String,
    },

    /// The stored checksum does not match the computed checksum of a section.
    #[error("checksum mismatch in {path}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// The state file path.
        path: PathBuf,
        /// The checksum stored in the file.
        expected: u32,
        /// The checksum computed from the bytes read.
        actual: u32,
    },

    /// The file declares columns that differ from the ones this build understands.
    #[error("schema mismatch in {path}: {reason}")]
    SchemaMismatch {
        /// The state file path.
        path: PathBuf,
        /// Which column disagreed.
        reason: String,
    },

    /// The file decoded but its contents are internally inconsistent.
    #[error("corrupted state in {path}: {reason}")]
    Corrupted {
        /// The state file path.
        path: PathBuf,
        /// Description of the inconsistency.
        reason: String,
    },

    /// Stored state is incompatible with the current configuration and no
    /// diagnostic sink was supplied to absorb the forced rebuild.
    #[error("rebuild required: {reason}")]
    RebuildRequired {
        /// Why the stored state was rejected.
        reason: String,
    },
}

impl CacheError {
    /// Wraps an I/O error with the path it occurred on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for errors caused by unreadable file contents rather
    /// than by the filesystem.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            CacheError::Serialization { .. }
                | CacheError::InvalidHeader { .. }
                | CacheError::ChecksumMismatch { .. }
                | CacheError::SchemaMismatch { .. }
                | CacheError::Corrupted { .. }
        )
    }
}
