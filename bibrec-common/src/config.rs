//! Configuration loading and bibliography folder resolution
//!
//! Bootstrap configuration lives in a TOML file. Every field has a built-in
//! default, so a missing file is never fatal: the loader logs a warning and
//! continues with defaults.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments
//! 2. Environment variables (`BIBREC_BIBLIOGRAPHY_FOLDER`)
//! 3. TOML configuration file
//! 4. Built-in defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the bibliography folder
pub const BIBLIOGRAPHY_FOLDER_ENV: &str = "BIBREC_BIBLIOGRAPHY_FOLDER";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder holding the canonical `*.bib` files (folder mode)
    pub bibliography_folder: Option<PathBuf>,

    /// Manifest listing canonical JSON databases (manifest mode)
    ///
    /// Takes precedence over `bibliography_folder` when both are set.
    pub manifest: Option<PathBuf>,

    /// Snapshot file for the pre-processed canonical index
    ///
    /// Default: `cache.json` next to the canonical sources
    pub cache_file: Option<PathBuf>,

    /// Sort output entries by citation key
    pub sort: bool,

    /// Drop entries with duplicate keys or duplicate bodies
    pub deduplicate: bool,

    /// Apply abbreviation rules to `booktitle` / `journal`
    pub shorten: bool,

    /// Field names stripped from every output entry
    pub remove_fields: Vec<String>,

    /// Venue abbreviation rules
    pub abbreviations: Vec<AbbreviationConfig>,

    /// Additional abbreviation rules in `short|pattern` line format
    pub abbreviation_file: Option<PathBuf>,

    /// Append a provenance note to updated entries
    pub annotate_updates: bool,

    /// Online lookup configuration
    pub online: OnlineConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            bibliography_folder: None,
            manifest: None,
            cache_file: None,
            sort: false,
            deduplicate: true,
            shorten: false,
            remove_fields: Vec::new(),
            abbreviations: Vec::new(),
            abbreviation_file: None,
            annotate_updates: true,
            online: OnlineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// A venue abbreviation: any value matching one of `patterns` becomes `short`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbbreviationConfig {
    pub short: String,
    pub patterns: Vec<String>,
}

/// Online lookup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnlineConfig {
    /// Query online services for entries the canonical index does not know
    pub enable: bool,

    /// Suggestions requested per service
    pub n_suggestions: usize,

    /// Service names ("dblp", "crossref")
    pub services: Vec<String>,

    /// Entries resolved concurrently per batch
    pub n_parallel_requests: usize,

    /// Completed tasks buffered ahead of the reviewer
    pub buffer_size: usize,

    /// Upper bound on a single service call
    pub request_timeout_secs: u64,

    /// Per-service request rate
    pub requests_per_second: u32,

    /// Ask on the terminal instead of deciding automatically
    pub interactive: bool,
}

impl Default for OnlineConfig {
    fn default() -> Self {
        Self {
            enable: false,
            n_suggestions: 3,
            services: vec!["dblp".to_string(), "crossref".to_string()],
            n_parallel_requests: 5,
            buffer_size: 15,
            request_timeout_secs: 10,
            requests_per_second: 5,
            interactive: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load a TOML configuration file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let config: TomlConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Configuration together with the file it was read from
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: TomlConfig,
    /// `None` when built-in defaults are in use
    pub source: Option<PathBuf>,
}

/// Load configuration from an explicit path, or discover one
///
/// An explicit path that cannot be read is a configuration error. A missing
/// discovered file is not: defaults are used. Runs before tracing is set up,
/// so callers report `source` themselves.
pub fn load_or_default(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let source = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(),
    };

    let config = match &source {
        Some(path) => load_toml_config(path)?,
        None => TomlConfig::default(),
    };
    Ok(LoadedConfig { config, source })
}

/// Locate the platform configuration file, if any
///
/// Linux: `~/.config/bibrec/config.toml`, then `/etc/bibrec/config.toml`.
/// Other platforms: the user config directory only.
pub fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("bibrec").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/bibrec/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Resolve the bibliography folder
///
/// Priority: CLI argument > environment variable > TOML > OS default.
pub fn resolve_bibliography_folder(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(BIBLIOGRAPHY_FOLDER_ENV) {
        if !path.trim().is_empty() {
            debug!("Bibliography folder from {}: {}", BIBLIOGRAPHY_FOLDER_ENV, path);
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.bibliography_folder {
        return path.clone();
    }

    let folder = default_bibliography_folder();
    debug!("Using default bibliography folder {}", folder.display());
    folder
}

/// OS-dependent default bibliography folder
pub fn default_bibliography_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("bibrec"))
        .unwrap_or_else(|| PathBuf::from("./bibrec_data"))
}

/// Parse abbreviation rules in `short|pattern` line format
///
/// Lines without exactly one `|` are ignored.
pub fn parse_abbreviation_lines(content: &str) -> Vec<AbbreviationConfig> {
    content
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('|').collect();
            if parts.len() != 2 {
                return None;
            }
            Some(AbbreviationConfig {
                short: parts[0].trim().to_string(),
                patterns: vec![parts[1].trim().to_string()],
            })
        })
        .collect()
}

/// Read abbreviation rules from a `short|pattern` file
pub fn read_abbreviation_file(path: &Path) -> Result<Vec<AbbreviationConfig>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read abbreviation file {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(parse_abbreviation_lines(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level() {
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn test_online_defaults() {
        let online = OnlineConfig::default();
        assert!(!online.enable);
        assert_eq!(online.n_suggestions, 3);
        assert_eq!(online.services, vec!["dblp", "crossref"]);
        assert_eq!(online.n_parallel_requests, 5);
        assert_eq!(online.buffer_size, 15);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            sort = true

            [online]
            enable = true
            n_parallel_requests = 2
            "#,
        )
        .unwrap();

        assert!(config.sort);
        assert!(config.deduplicate);
        assert!(config.online.enable);
        assert_eq!(config.online.n_parallel_requests, 2);
        assert_eq!(config.online.buffer_size, 15);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_abbreviation_lines() {
        let rules = parse_abbreviation_lines("ACL | ^Proc\\. .*ACL\nbroken line\nA|B|C\nEMNLP|^.*Empirical");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].short, "ACL");
        assert_eq!(rules[0].patterns, vec!["^Proc\\. .*ACL"]);
        assert_eq!(rules[1].short, "EMNLP");
    }
}
