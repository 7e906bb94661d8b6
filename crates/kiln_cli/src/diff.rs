//! `kiln diff`: hash source files and classify them against a snapshot.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use kiln_cache::columnar::StateFileReader;
use kiln_cache::{LoadStateResult, SourceStateStore};
use kiln_common::{ContentDigest, PathCodec, PathKind};
use kiln_diagnostics::{
    Diagnostic, DiagnosticCode, DiagnosticRenderer, DiagnosticSink, TerminalRenderer,
};

use crate::project::{absolutize, load_project};
use crate::{DiffArgs, GlobalArgs};

/// Classification of the sources of one target.
#[derive(Debug, Default, PartialEq, Eq)]
struct DiffReport {
    new: Vec<PathBuf>,
    changed: Vec<PathBuf>,
    unchanged: Vec<PathBuf>,
    deleted: Vec<(PathBuf, usize)>,
}

/// Runs the `kiln diff` command.
///
/// Every listed source is hashed and compared with the snapshot; sources the
/// snapshot knows but that were not listed are reported as deleted. Without
/// a readable snapshot every source is new. Returns exit code 1 if the
/// snapshot exists but cannot be read.
pub fn run(args: &DiffArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = load_project(global)?;
    let codec = project.codec(args.target.as_deref())?;

    let mut actual = HashMap::with_capacity(args.sources.len());
    for source in &args.sources {
        let path = absolutize(source)?;
        let bytes = std::fs::read(&path).map_err(|e| format!("{}: {e}", path.display()))?;
        let digest = ContentDigest::of(&bytes);
        if global.verbose {
            eprintln!("   {digest}  {}", path.display());
        }
        actual.insert(path, digest);
    }

    let sink = DiagnosticSink::new();
    let store = SourceStateStore::new(&args.file);
    let loaded = load_snapshot(&store, &codec, &actual, &sink);
    for diag in sink.take_all() {
        eprint!("{}", TerminalRenderer.render(&diag));
    }
    if sink.has_errors() {
        return Ok(1);
    }

    let report = match loaded {
        Some(result) => {
            let stored = stored_sources(&args.file, &codec)?;
            classify(&result, &stored)
        }
        None => DiffReport {
            new: sorted(actual.into_keys()),
            ..DiffReport::default()
        },
    };
    print!("{}", render(&report, &project.dir));
    if !global.quiet {
        eprintln!(
            "   {} new, {} changed, {} unchanged, {} deleted",
            report.new.len(),
            report.changed.len(),
            report.unchanged.len(),
            report.deleted.len()
        );
    }
    Ok(0)
}

/// Loads the snapshot. Failures the store cannot degrade are reported to
/// `sink` as errors.
fn load_snapshot(
    store: &SourceStateStore,
    codec: &dyn PathCodec,
    actual: &HashMap<PathBuf, ContentDigest>,
    sink: &DiagnosticSink,
) -> Option<LoadStateResult> {
    store
        .load(codec, actual, None, Some(sink))
        .unwrap_or_else(|e| {
            sink.emit(
                Diagnostic::error(DiagnosticCode::STATE_IO, e.to_string()).with_file(store.path()),
            );
            None
        })
}

/// Absolute paths of every source in the snapshot at `file`.
fn stored_sources(
    file: &Path,
    codec: &dyn PathCodec,
) -> Result<HashSet<PathBuf>, Box<dyn std::error::Error>> {
    let Some(reader) = StateFileReader::open(file)? else {
        return Ok(HashSet::new());
    };
    let batch = reader.read_batch()?;
    Ok((0..batch.len())
        .map(|row| codec.to_absolute(batch.source_file(row), PathKind::Source))
        .collect())
}

fn classify(result: &LoadStateResult, stored: &HashSet<PathBuf>) -> DiffReport {
    let mut report = DiffReport::default();
    for descriptor in result.map.values() {
        let path = descriptor.source_file.clone();
        if descriptor.is_up_to_date() {
            report.unchanged.push(path);
        } else if stored.contains(&path) {
            report.changed.push(path);
        } else {
            report.new.push(path);
        }
    }
    report.new.sort();
    report.changed.sort();
    report.unchanged.sort();
    report.deleted = result
        .deleted_files
        .iter()
        .map(|removed| (removed.source_file.clone(), removed.outputs.len()))
        .collect();
    report
}

fn sorted(paths: impl Iterator<Item = PathBuf>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = paths.collect();
    paths.sort();
    paths
}

fn render(report: &DiffReport, base: &Path) -> String {
    let show = |path: &Path| path.strip_prefix(base).unwrap_or(path).display().to_string();
    let mut out = String::new();
    for path in &report.new {
        out.push_str(&format!("new      {}\n", show(path)));
    }
    for path in &report.changed {
        out.push_str(&format!("changed  {}\n", show(path)));
    }
    for (path, outputs) in &report.deleted {
        out.push_str(&format!("deleted  {} ({outputs} output(s))\n", show(path)));
    }
    out
}
