//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::KilnConfig;
use std::io::ErrorKind;
use std::path::Path;

/// Name of the configuration file inside a project directory.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Loads and validates `<project_dir>/kiln.toml`.
pub fn load_config(project_dir: &Path) -> Result<KilnConfig, ConfigError> {
    let content = std::fs::read_to_string(project_dir.join(CONFIG_FILE))?;
    load_config_from_str(&content)
}

/// Like [`load_config`], but a missing file yields the default configuration.
pub fn load_config_or_default(project_dir: &Path) -> Result<KilnConfig, ConfigError> {
    match std::fs::read_to_string(project_dir.join(CONFIG_FILE)) {
        Ok(content) => load_config_from_str(&content),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(dir = %project_dir.display(), "no kiln.toml, using defaults");
            Ok(KilnConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Parses and validates a `kiln.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<KilnConfig, ConfigError> {
    let config: KilnConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &KilnConfig) -> Result<(), ConfigError> {
    let files = [
        ("state.source_state_file", &config.state.source_state_file),
        ("state.stats_file", &config.state.stats_file),
    ];
    for (field, value) in files {
        if value.is_empty() || value.contains(['/', '\\']) {
            return Err(ConfigError::ValidationError(format!(
                "{field} must be a plain file name, got '{value}'"
            )));
        }
    }
    if config.state.source_state_file == config.state.stats_file {
        return Err(ConfigError::ValidationError(
            "state.source_state_file and state.stats_file must differ".to_string(),
        ));
    }
    if !(1..=100).contains(&config.rebuild.threshold_percent) {
        return Err(ConfigError::ValidationError(format!(
            "rebuild.threshold_percent must be within 1..=100, got {}",
            config.rebuild.threshold_percent
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.state.dir, ".kiln");
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[state]
dir = "build/.kiln"
source_state_file = "src.kst"
stats_file = "targets.kv"

[roots]
source = "."
output = "build/out"

[stats]
compaction_threshold = 8

[rebuild]
threshold_percent = 80

[targets.core]
source = "core"
output = "build/out/core"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.state.dir, "build/.kiln");
        assert_eq!(config.state.source_state_file, "src.kst");
        assert_eq!(config.roots.output, "build/out");
        assert_eq!(config.stats.compaction_threshold, 8);
        assert_eq!(config.rebuild.threshold_percent, 80);
        assert_eq!(config.targets["core"].source, "core");
    }

    #[test]
    fn file_name_with_separator_rejected() {
        let err = load_config_from_str("[state]\nstats_file = \"a/b.kv\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn identical_file_names_rejected() {
        let toml = "[state]\nsource_state_file = \"x\"\nstats_file = \"x\"\n";
        assert!(matches!(
            load_config_from_str(toml).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let err = load_config_from_str("[rebuild]\nthreshold_percent = 0\n").unwrap_err();
        assert!(err.to_string().contains("threshold_percent"));
    }

    #[test]
    fn invalid_toml_syntax() {
        let err = load_config_from_str("this is not valid toml [[[").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn missing_file_is_error_for_strict_loader() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_config(dir.path()).unwrap_err(),
            ConfigError::IoError(_)
        ));
    }

    #[test]
    fn missing_file_defaults_for_lenient_loader() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_or_default(dir.path()).unwrap();
        assert_eq!(config.rebuild.threshold_percent, 95);
    }

    #[test]
    fn load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[stats]\ncompaction_threshold = 3\n")
            .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.stats.compaction_threshold, 3);
    }
}
