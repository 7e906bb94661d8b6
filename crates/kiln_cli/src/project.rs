//! Project discovery shared by the CLI commands.
//!
//! A project is the directory holding `kiln.toml`. Commands that only read a
//! state file work without one; defaults are used when no config is found.

use std::path::{Path, PathBuf};

use kiln_common::RootedPathCodec;
use kiln_config::{KilnConfig, CONFIG_FILE};

use crate::GlobalArgs;

/// A loaded project: its root directory and configuration.
#[derive(Debug)]
pub struct Project {
    /// Directory containing `kiln.toml`, or the working directory.
    pub dir: PathBuf,
    /// Parsed configuration, or defaults.
    pub config: KilnConfig,
}

impl Project {
    /// Path codec for `target`, or for the project-wide roots.
    pub fn codec(&self, target: Option<&str>) -> Result<RootedPathCodec, Box<dyn std::error::Error>> {
        let (source_root, output_root) = match target {
            Some(name) => {
                let resolved = kiln_config::resolve_target(&self.config, &self.dir, name)?;
                (resolved.source_root, resolved.output_root)
            }
            None => (
                self.dir.join(&self.config.roots.source),
                self.dir.join(&self.config.roots.output),
            ),
        };
        Ok(RootedPathCodec::new(source_root, output_root))
    }
}

/// Walks up from `start` looking for the nearest directory containing `kiln.toml`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(CONFIG_FILE).is_file())
        .map(Path::to_path_buf)
}

/// Resolves the project directory from global CLI args.
///
/// If `--config` is specified, uses that path (file → parent dir, dir → itself).
/// Otherwise walks up from the current directory, falling back to it.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(ref config_path) = global.config {
        if config_path.is_file() {
            return Ok(config_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")));
        }
        return Ok(config_path.clone());
    }
    let cwd = std::env::current_dir()?;
    Ok(find_project_root(&cwd).unwrap_or(cwd))
}

/// Loads the project configuration, using defaults when `kiln.toml` is absent.
pub fn load_project(global: &GlobalArgs) -> Result<Project, Box<dyn std::error::Error>> {
    let dir = resolve_project_root(global)?;
    let config = kiln_config::load_config_or_default(&dir)?;
    tracing::debug!(dir = %dir.display(), "loaded project");
    Ok(Project { dir, config })
}

/// Makes `path` absolute against the working directory.
pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
