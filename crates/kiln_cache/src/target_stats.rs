//! Per-target statistics and configuration digest, kept in a key-value log.
//!
//! The log holds exactly two records: the [`ConfigurationDigestContainer`]
//! of the last build and the [`TargetStateContainer`]. Saves skip records
//! whose contents are unchanged, so an idle rebuild writes nothing.

use std::path::Path;

use kiln_diagnostics::{Diagnostic, DiagnosticCode, DiagnosticSink};

use crate::config_digest::ConfigurationDigestContainer;
use crate::error::CacheError;
use crate::kv::{skip_if_identical, KeyValueLog};
use crate::stats::TargetStateContainer;

/// Key of the configuration digest record.
pub const CONFIGURATION_DIGEST_KEY: u32 = 0;

/// Key of the target statistics record.
pub const TARGET_STATE_KEY: u32 = 1;

/// Superseded records tolerated before the log is compacted, unless configured.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 64;

/// The target stats store of one target.
#[derive(Debug)]
pub struct TargetStatsStore {
    log: KeyValueLog,
}

impl TargetStatsStore {
    /// Opens the store at `path`, creating it if absent.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        Self::open_with_threshold(path, DEFAULT_COMPACTION_THRESHOLD)
    }

    /// Opens the store with an explicit compaction threshold.
    pub fn open_with_threshold(path: &Path, compaction_threshold: usize) -> Result<Self, CacheError> {
        Ok(Self {
            log: KeyValueLog::open_or_create(path, compaction_threshold)?,
        })
    }

    /// Opens the store, discarding it if its contents are unreadable.
    ///
    /// A corrupt store is reported to `sink`, deleted, and recreated empty,
    /// which makes the next [`configuration_mismatch`](Self::configuration_mismatch)
    /// request a rebuild. Filesystem errors are returned.
    pub fn open_or_reset(
        path: &Path,
        compaction_threshold: usize,
        sink: &DiagnosticSink,
    ) -> Result<Self, CacheError> {
        match Self::open_with_threshold(path, compaction_threshold) {
            Err(e) if e.is_corruption() => {
                sink.emit(
                    Diagnostic::warning(DiagnosticCode::TARGET_STATS_CORRUPTED, e.to_string())
                        .with_file(path)
                        .with_note("target statistics reset"),
                );
                std::fs::remove_file(path).map_err(|e| CacheError::io(path, e))?;
                Self::open_with_threshold(path, compaction_threshold)
            }
            other => other,
        }
    }

    /// Opens the store at `path` and compares its configuration digest with
    /// `digests`.
    ///
    /// Returns `None` when the stored digest matches. Any reason to distrust
    /// the stored state, including a store that cannot be opened, comes back
    /// as a human-readable rebuild reason rather than an error.
    pub fn check_configuration(path: &Path, digests: &ConfigurationDigestContainer) -> Option<String> {
        match Self::open(path) {
            Ok(store) => store.configuration_mismatch(digests),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot open target stats");
                Some(format!("cannot open target stats: {e}"))
            }
        }
    }

    /// Compares the stored configuration digest with `digests`.
    pub fn configuration_mismatch(&self, digests: &ConfigurationDigestContainer) -> Option<String> {
        match self.log.get(CONFIGURATION_DIGEST_KEY) {
            Some(record) => digests.mismatch_against_record(record),
            None => Some("no configuration digest stored for target".to_string()),
        }
    }

    /// Returns a copy of the stored statistics, or fresh statistics if none
    /// are stored or they were written by an incompatible schema.
    pub fn load_target_state(&self) -> TargetStateContainer {
        let Some(record) = self.log.get(TARGET_STATE_KEY) else {
            return TargetStateContainer::new();
        };
        let state = TargetStateContainer::from_record(record.to_vec());
        if state.is_correct() {
            state
        } else {
            tracing::debug!(
                path = %self.log.path().display(),
                slots = record.len(),
                "discarding target stats written by another schema"
            );
            TargetStateContainer::new()
        }
    }

    /// Stores the statistics and configuration digest. Records identical to
    /// the stored ones are not rewritten. Returns the number of records written.
    pub fn save_target_state(
        &mut self,
        state: &TargetStateContainer,
        digests: &ConfigurationDigestContainer,
    ) -> Result<usize, CacheError> {
        let mut written = 0;
        if self.log.compare_and_put(
            CONFIGURATION_DIGEST_KEY,
            &digests.to_record(),
            skip_if_identical,
        )? {
            written += 1;
        }
        if self
            .log
            .compare_and_put(TARGET_STATE_KEY, state.as_record(), skip_if_identical)?
        {
            written += 1;
        }
        tracing::debug!(path = %self.log.path().display(), written, "saved target stats");
        Ok(written)
    }

    /// The underlying log.
    pub fn log(&self) -> &KeyValueLog {
        &self.log
    }
}
