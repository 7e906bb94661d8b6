//! Per-target source state: which sources were compiled from which content
//! and what they produced.
//!
//! A snapshot is rewritten whole after every build. Before the next build it
//! is diffed against freshly computed content digests to classify every
//! source as unchanged, changed, new, or deleted.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use kiln_common::{ContentDigest, PathCodec, PathKind, SchemaEnum};
use kiln_diagnostics::{Diagnostic, DiagnosticCode, DiagnosticSink};

use crate::columnar::{write_state_file, ColumnBatch, StateFileReader};
use crate::config_digest::{
    category_mismatch, parse_base36, ConfigurationCategory, ConfigurationDigestContainer,
};
use crate::error::CacheError;

/// Metadata key holding the snapshot format version.
pub const FORMAT_VERSION_KEY: &str = "version";

/// Current snapshot format version. Bump when the meaning of stored rows changes.
pub const FORMAT_VERSION: &str = "1";

/// State of one tracked source file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Absolute path of the source.
    pub source_file: PathBuf,
    /// Content digest as of the last successful compile. `None` means the
    /// source must be recompiled.
    pub digest: Option<ContentDigest>,
    /// Files produced by compiling this source, if any are known.
    pub outputs: Option<Vec<PathBuf>>,
}

impl SourceDescriptor {
    /// A source that has never been compiled.
    pub fn unknown(source_file: impl Into<PathBuf>) -> Self {
        Self {
            source_file: source_file.into(),
            digest: None,
            outputs: None,
        }
    }

    /// Returns `true` if the source can be skipped by the compiler.
    pub fn is_up_to_date(&self) -> bool {
        self.digest.is_some()
    }
}

/// A source that was present in the previous snapshot and is gone now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovedFileInfo {
    /// Absolute path of the removed source.
    pub source_file: PathBuf,
    /// Previously produced files that must be deleted.
    pub outputs: Vec<PathBuf>,
}

/// Outcome of loading a snapshot and reconciling it with current digests.
#[derive(Clone, Debug, Default)]
pub struct LoadStateResult {
    /// Set when the stored state was rejected. `map` then lists every current
    /// source as unknown and the caller must rebuild the whole target.
    pub rebuild_requested: Option<String>,
    /// Reconciled state of every current source.
    pub map: HashMap<PathBuf, SourceDescriptor>,
    /// Reserved; always empty. Changed sources carry a `None` digest in `map`,
    /// see [`stale_sources`](Self::stale_sources).
    pub changed_files: Vec<PathBuf>,
    /// Sources present before and absent now, with their outputs.
    pub deleted_files: Vec<RemovedFileInfo>,
}

impl LoadStateResult {
    /// A result that forces a full rebuild: every current source is unknown.
    pub fn rebuild(reason: String, actual_digests: &HashMap<PathBuf, ContentDigest>) -> Self {
        Self {
            rebuild_requested: Some(reason),
            map: actual_digests
                .keys()
                .map(|path| (path.clone(), SourceDescriptor::unknown(path.clone())))
                .collect(),
            changed_files: Vec::new(),
            deleted_files: Vec::new(),
        }
    }

    /// Sources that must be recompiled (changed or new), sorted.
    pub fn stale_sources(&self) -> Vec<&Path> {
        let mut stale: Vec<&Path> = self
            .map
            .values()
            .filter(|d| !d.is_up_to_date())
            .map(|d| d.source_file.as_path())
            .collect();
        stale.sort();
        stale
    }

    /// Outputs of every deleted source, in deletion order.
    pub fn outputs_to_delete(&self) -> impl Iterator<Item = &Path> {
        self.deleted_files
            .iter()
            .flat_map(|removed| removed.outputs.iter().map(PathBuf::as_path))
    }
}

/// Builds the snapshot metadata for a configuration: the format version and
/// one base-36 digest per category, keyed by category name.
pub fn source_state_metadata(digests: &ConfigurationDigestContainer) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert(FORMAT_VERSION_KEY.to_string(), FORMAT_VERSION.to_string());
    for (&category, value) in ConfigurationCategory::ALL.iter().zip(digests.as_strings()) {
        metadata.insert(category.name().to_string(), value);
    }
    metadata
}

/// The on-disk source state store of one target.
#[derive(Clone, Debug)]
pub struct SourceStateStore {
    path: PathBuf,
}

impl SourceStateStore {
    /// Creates a store backed by the file at `path`. Nothing is read yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the snapshot with `records`, in the given order.
    ///
    /// Paths must be unique; duplicates are written as-is. A descriptor
    /// without outputs is stored with an empty output list.
    pub fn save(
        &self,
        records: &[SourceDescriptor],
        codec: &dyn PathCodec,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), CacheError> {
        let mut batch = ColumnBatch::new();
        for record in records {
            let outputs = record
                .outputs
                .iter()
                .flatten()
                .map(|output| codec.to_relative(output, PathKind::Output));
            batch.push(
                codec.to_relative(&record.source_file, PathKind::Source),
                record.digest.as_ref(),
                outputs,
            );
        }
        write_state_file(&self.path, metadata, &batch)
    }

    /// Loads the snapshot and reconciles it with `actual_digests`, the
    /// current content digest of every source of the target.
    ///
    /// Returns `Ok(None)` when no snapshot exists. When
    /// `configuration_digests` is given, a format version or configuration
    /// mismatch yields a result with `rebuild_requested` set, or
    /// [`CacheError::RebuildRequired`] if no `sink` was supplied. With a
    /// sink, an unreadable snapshot is reported and treated as absent;
    /// filesystem errors are always returned.
    pub fn load(
        &self,
        codec: &dyn PathCodec,
        actual_digests: &HashMap<PathBuf, ContentDigest>,
        configuration_digests: Option<&ConfigurationDigestContainer>,
        sink: Option<&DiagnosticSink>,
    ) -> Result<Option<LoadStateResult>, CacheError> {
        let reader = match StateFileReader::open(&self.path) {
            Ok(Some(reader)) => reader,
            Ok(None) => {
                tracing::debug!(path = %self.path.display(), "no source state, cold start");
                return Ok(None);
            }
            Err(e) => return self.degrade(e, sink),
        };

        if let Some(digests) = configuration_digests {
            if let Some((code, reason)) = metadata_mismatch(reader.metadata(), digests) {
                return match sink {
                    Some(sink) => {
                        sink.emit(
                            Diagnostic::info(code, &reason)
                                .with_file(&self.path)
                                .with_note("all sources of the target will be recompiled"),
                        );
                        Ok(Some(LoadStateResult::rebuild(reason, actual_digests)))
                    }
                    None => Err(CacheError::RebuildRequired { reason }),
                };
            }
        }

        let batch = match reader.read_batch() {
            Ok(batch) => batch,
            Err(e) => return self.degrade(e, sink),
        };
        let result = reconcile(&batch, codec, actual_digests);
        tracing::debug!(
            path = %self.path.display(),
            stored = batch.len(),
            stale = result.map.values().filter(|d| !d.is_up_to_date()).count(),
            deleted = result.deleted_files.len(),
            "reconciled source state"
        );
        Ok(Some(result))
    }

    fn degrade(
        &self,
        error: CacheError,
        sink: Option<&DiagnosticSink>,
    ) -> Result<Option<LoadStateResult>, CacheError> {
        match sink {
            Some(sink) if error.is_corruption() => {
                sink.emit(
                    Diagnostic::warning(DiagnosticCode::SOURCE_STATE_CORRUPTED, error.to_string())
                        .with_file(&self.path)
                        .with_note("incremental state discarded"),
                );
                Ok(None)
            }
            _ => Err(error),
        }
    }
}

/// Compares stored metadata with the current configuration. Returns the
/// diagnostic code and reason for the first check that fails.
fn metadata_mismatch(
    metadata: &BTreeMap<String, String>,
    digests: &ConfigurationDigestContainer,
) -> Option<(DiagnosticCode, String)> {
    let version_problem = match metadata.get(FORMAT_VERSION_KEY) {
        Some(version) if version == FORMAT_VERSION => None,
        Some(version) => Some(format!(
            "source state format version changed (stored {version}, current {FORMAT_VERSION})"
        )),
        None => Some("source state format version is missing".to_string()),
    };
    if let Some(reason) = version_problem {
        return Some((DiagnosticCode::FORMAT_VERSION_CHANGED, reason));
    }

    let reason = ConfigurationCategory::ALL.iter().find_map(|&category| {
        let current = digests.get(category);
        match metadata.get(category.name()).map(|s| parse_base36(s)) {
            Some(Some(stored)) => category_mismatch(category, stored, current),
            Some(None) => Some(format!(
                "{} digest is unreadable in source state",
                category.description()
            )),
            None => Some(format!(
                "{} digest is missing from source state",
                category.description()
            )),
        }
    })?;
    Some((DiagnosticCode::CONFIGURATION_CHANGED, reason))
}

/// Classifies every stored row against the current digests.
fn reconcile(
    batch: &ColumnBatch,
    codec: &dyn PathCodec,
    actual_digests: &HashMap<PathBuf, ContentDigest>,
) -> LoadStateResult {
    let mut map = HashMap::with_capacity(actual_digests.len());
    let mut deleted_files = Vec::new();
    let mut new_files = actual_digests.clone();

    for row in 0..batch.len() {
        let source_file = codec.to_absolute(batch.source_file(row), PathKind::Source);
        let stored_outputs = batch.outputs(row);

        let Some(actual) = new_files.remove(&source_file) else {
            if !stored_outputs.is_empty() {
                deleted_files.push(RemovedFileInfo {
                    source_file,
                    outputs: absolute_outputs(codec, stored_outputs),
                });
            }
            continue;
        };

        let digest = batch.digest(row).filter(|stored| *stored == actual);
        let outputs = (!stored_outputs.is_empty()).then(|| absolute_outputs(codec, stored_outputs));
        map.insert(
            source_file.clone(),
            SourceDescriptor {
                source_file,
                digest,
                outputs,
            },
        );
    }

    for source_file in new_files.into_keys() {
        map.insert(source_file.clone(), SourceDescriptor::unknown(source_file));
    }

    LoadStateResult {
        rebuild_requested: None,
        map,
        changed_files: Vec::new(),
        deleted_files,
    }
}

fn absolute_outputs(codec: &dyn PathCodec, stored: &[String]) -> Vec<PathBuf> {
    stored
        .iter()
        .map(|output| codec.to_absolute(output, PathKind::Output))
        .collect()
}
