//! Conversion between absolute paths and portable stored path strings.

use std::path::{Component, Path, PathBuf};

/// Which root a stored path is relative to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PathKind {
    /// A source file of the compiled target.
    Source,
    /// A file produced by compiling a source.
    Output,
}

/// Renders paths into repository-relative, platform-independent strings and
/// back, so that persisted state is portable across checkouts.
pub trait PathCodec {
    /// Renders an absolute path as a stored string.
    fn to_relative(&self, path: &Path, kind: PathKind) -> String;

    /// Resolves a stored string back into an absolute path.
    fn to_absolute(&self, stored: &str, kind: PathKind) -> PathBuf;
}

/// A [`PathCodec`] that stores paths relative to a source root and an output root.
///
/// Stored strings always use `/` as separator. `.` and `..` are resolved
/// lexically before the root is stripped. Paths that end up outside their
/// root are stored as-is (with separators normalized) and resolved unchanged.
#[derive(Clone, Debug)]
pub struct RootedPathCodec {
    source_root: PathBuf,
    output_root: PathBuf,
}

impl RootedPathCodec {
    /// Creates a codec for the given source and output roots.
    pub fn new(source_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            output_root: output_root.into(),
        }
    }

    fn root(&self, kind: PathKind) -> &Path {
        match kind {
            PathKind::Source => &self.source_root,
            PathKind::Output => &self.output_root,
        }
    }
}

impl PathCodec for RootedPathCodec {
    fn to_relative(&self, path: &Path, kind: PathKind) -> String {
        let normalized = normalize(path);
        match normalized.strip_prefix(self.root(kind)) {
            Ok(relative) if is_plain(relative) => join_components(relative),
            _ => path.to_string_lossy().replace('\\', "/"),
        }
    }

    fn to_absolute(&self, stored: &str, kind: PathKind) -> PathBuf {
        let candidate = Path::new(stored);
        if candidate.is_absolute() {
            return candidate.to_path_buf();
        }
        let mut resolved = self.root(kind).to_path_buf();
        resolved.extend(stored.split('/').filter(|segment| !segment.is_empty()));
        resolved
    }
}

/// Resolves `.` and `..` lexically. A `..` that cannot pop a normal
/// component is kept.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn is_plain(relative: &Path) -> bool {
    relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
}

fn join_components(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
