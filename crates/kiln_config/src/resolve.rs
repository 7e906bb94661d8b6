//! Target resolution: turning configuration into concrete state file locations.

use crate::error::ConfigError;
use crate::types::KilnConfig;
use std::path::{Component, Path, PathBuf};

/// Absolute locations of everything the cache needs for one target.
///
/// Roots come from the target's entry in `[targets]` when present and from
/// `[roots]` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// The target name.
    pub name: String,
    /// Directory holding this target's state files.
    pub state_dir: PathBuf,
    /// Path of the source state store.
    pub source_state_path: PathBuf,
    /// Path of the target stats store.
    pub stats_path: PathBuf,
    /// Root for stored source paths.
    pub source_root: PathBuf,
    /// Root for stored output paths.
    pub output_root: PathBuf,
}

/// Resolves the state locations and path roots of a named target.
///
/// The target name becomes a directory name, so it must be a single normal
/// path component.
pub fn resolve_target(
    config: &KilnConfig,
    project_dir: &Path,
    target_name: &str,
) -> Result<ResolvedTarget, ConfigError> {
    let mut components = Path::new(target_name).components();
    let is_plain = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !is_plain {
        return Err(ConfigError::ValidationError(format!(
            "target name '{target_name}' is not a plain directory name"
        )));
    }

    let roots = config.targets.get(target_name).unwrap_or(&config.roots);
    let state_dir = project_dir.join(&config.state.dir).join(target_name);

    Ok(ResolvedTarget {
        name: target_name.to_string(),
        source_state_path: state_dir.join(&config.state.source_state_file),
        stats_path: state_dir.join(&config.state.stats_file),
        state_dir,
        source_root: project_dir.join(&roots.source),
        output_root: project_dir.join(&roots.output),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;

    #[test]
    fn resolves_default_layout() {
        let config = KilnConfig::default();
        let resolved = resolve_target(&config, Path::new("/proj"), "app").unwrap();
        assert_eq!(resolved.state_dir, PathBuf::from("/proj/.kiln/app"));
        assert_eq!(
            resolved.source_state_path,
            PathBuf::from("/proj/.kiln/app/sources.kst")
        );
        assert_eq!(resolved.stats_path, PathBuf::from("/proj/.kiln/app/stats.kv"));
        assert_eq!(resolved.source_root, PathBuf::from("/proj/."));
        assert_eq!(resolved.output_root, PathBuf::from("/proj/out"));
    }

    #[test]
    fn target_override_replaces_roots() {
        let config = load_config_from_str(
            "[targets.core]\nsource = \"core/src\"\noutput = \"out/core\"\n",
        )
        .unwrap();
        let resolved = resolve_target(&config, Path::new("/proj"), "core").unwrap();
        assert_eq!(resolved.source_root, PathBuf::from("/proj/core/src"));
        assert_eq!(resolved.output_root, PathBuf::from("/proj/out/core"));

        let other = resolve_target(&config, Path::new("/proj"), "web").unwrap();
        assert_eq!(other.output_root, PathBuf::from("/proj/out"));
    }

    #[test]
    fn rejects_nested_or_empty_names() {
        let config = KilnConfig::default();
        for bad in ["", "a/b", "..", "/abs"] {
            assert!(
                resolve_target(&config, Path::new("/proj"), bad).is_err(),
                "{bad:?} should be rejected"
            );
        }
    }
}
