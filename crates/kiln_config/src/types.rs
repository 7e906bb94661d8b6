//! Configuration types deserialized from `kiln.toml`.

use serde::Deserialize;
use std::collections::BTreeMap;

/// The top-level configuration parsed from `kiln.toml`.
///
/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KilnConfig {
    /// Where per-target state files live.
    #[serde(default)]
    pub state: StateConfig,
    /// Default roots used to store portable paths.
    #[serde(default)]
    pub roots: RootsConfig,
    /// Target stats store tuning.
    #[serde(default)]
    pub stats: StatsConfig,
    /// Full-rebuild heuristic tuning.
    #[serde(default)]
    pub rebuild: RebuildConfig,
    /// Per-target root overrides, keyed by target name.
    #[serde(default)]
    pub targets: BTreeMap<String, RootsConfig>,
}

/// Location and file names of persisted state.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    /// Directory holding one subdirectory per target, relative to the project directory.
    #[serde(default = "default_state_dir")]
    pub dir: String,
    /// File name of the source state store inside a target directory.
    #[serde(default = "default_source_state_file")]
    pub source_state_file: String,
    /// File name of the target stats store inside a target directory.
    #[serde(default = "default_stats_file")]
    pub stats_file: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            source_state_file: default_source_state_file(),
            stats_file: default_stats_file(),
        }
    }
}

/// Source and output roots, relative to the project directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootsConfig {
    /// Root that stored source paths are relative to.
    #[serde(default = "default_source_root")]
    pub source: String,
    /// Root that stored output paths are relative to.
    #[serde(default = "default_output_root")]
    pub output: String,
}

impl Default for RootsConfig {
    fn default() -> Self {
        Self {
            source: default_source_root(),
            output: default_output_root(),
        }
    }
}

/// Key-value log tuning for the target stats store.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatsConfig {
    /// Number of superseded records tolerated before the log is compacted.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: default_compaction_threshold(),
        }
    }
}

/// Tuning for the "too many dirty targets" full rebuild heuristic.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RebuildConfig {
    /// Percentage of the last clean rebuild duration at which an incremental
    /// build is abandoned in favor of a full rebuild.
    #[serde(default = "default_threshold_percent")]
    pub threshold_percent: u8,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            threshold_percent: default_threshold_percent(),
        }
    }
}

fn default_state_dir() -> String {
    ".kiln".to_string()
}

fn default_source_state_file() -> String {
    "sources.kst".to_string()
}

fn default_stats_file() -> String {
    "stats.kv".to_string()
}

fn default_source_root() -> String {
    ".".to_string()
}

fn default_output_root() -> String {
    "out".to_string()
}

fn default_compaction_threshold() -> usize {
    64
}

fn default_threshold_percent() -> u8 {
    95
}
