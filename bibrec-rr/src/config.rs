//! Run configuration
//!
//! Merges command-line values with the TOML bootstrap configuration and
//! validates the result. Every problem found here is fatal: the run stops
//! before any entry is processed.

use crate::error::{ReconcileError, Result};
use crate::index::IndexSource;
use crate::lookup::{ServiceKind, ServiceOptions};
use crate::output::{AbbreviationRule, OutputOptions};
use crate::pipeline::PipelineConfig;
use bibrec_common::config::{
    read_abbreviation_file, resolve_bibliography_folder, AbbreviationConfig, TomlConfig,
};
use std::path::PathBuf;
use std::time::Duration;

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub input: PathBuf,
    /// Defaults to the input path
    pub output: Option<PathBuf>,
    pub bibliography_folder: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
    pub sort: bool,
    pub no_deduplicate: bool,
    pub shorten: bool,
    pub remove_fields: Vec<String>,
    pub online: bool,
    pub no_interactive: bool,
    pub no_cache: bool,
}

/// Online lookup settings; present only when lookups are enabled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineSettings {
    pub services: Vec<ServiceKind>,
    pub service_options: ServiceOptions,
    pub pipeline: PipelineConfig,
    pub interactive: bool,
}

/// Validated configuration of one reconciliation run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub index_source: IndexSource,
    /// `None` disables the snapshot
    pub cache_file: Option<PathBuf>,
    pub output_options: OutputOptions,
    pub annotate_updates: bool,
    pub online: Option<OnlineSettings>,
}

impl RunConfig {
    pub fn resolve(cli: &CliOverrides, toml: &TomlConfig) -> Result<Self> {
        if !cli.input.is_file() {
            return Err(ReconcileError::Config(format!(
                "Input file not found: {}",
                cli.input.display()
            )));
        }

        let index_source = match cli.manifest.as_ref().or(toml.manifest.as_ref()) {
            Some(manifest) => {
                if !manifest.is_file() {
                    return Err(ReconcileError::Config(format!(
                        "Manifest not found: {}",
                        manifest.display()
                    )));
                }
                IndexSource::Manifest(manifest.clone())
            }
            None => {
                let folder = resolve_bibliography_folder(cli.bibliography_folder.as_deref(), toml);
                if !folder.is_dir() {
                    return Err(ReconcileError::Config(format!(
                        "Bibliography folder not found: {}",
                        folder.display()
                    )));
                }
                IndexSource::Folder(folder)
            }
        };

        let cache_file = if cli.no_cache {
            None
        } else {
            Some(
                toml.cache_file
                    .clone()
                    .unwrap_or_else(|| index_source.default_cache_file()),
            )
        };

        let mut remove_fields = toml.remove_fields.clone();
        for field in &cli.remove_fields {
            if !remove_fields.contains(field) {
                remove_fields.push(field.clone());
            }
        }

        let abbreviations = if cli.shorten || toml.shorten {
            abbreviation_rules(toml)?
        } else {
            Vec::new()
        };

        let online = if cli.online || toml.online.enable {
            Some(online_settings(toml, cli.no_interactive)?)
        } else {
            None
        };

        Ok(Self {
            input: cli.input.clone(),
            output: cli.output.clone().unwrap_or_else(|| cli.input.clone()),
            index_source,
            cache_file,
            output_options: OutputOptions {
                sort: cli.sort || toml.sort,
                deduplicate: toml.deduplicate && !cli.no_deduplicate,
                remove_fields,
                abbreviations,
            },
            annotate_updates: toml.annotate_updates,
            online,
        })
    }
}

/// Compile TOML rules followed by file rules
fn abbreviation_rules(toml: &TomlConfig) -> Result<Vec<AbbreviationRule>> {
    let mut configs: Vec<AbbreviationConfig> = toml.abbreviations.clone();
    if let Some(path) = &toml.abbreviation_file {
        configs.extend(read_abbreviation_file(path)?);
    }

    let mut rules = Vec::new();
    for config in &configs {
        for pattern in &config.patterns {
            rules.push(AbbreviationRule::new(config.short.clone(), pattern)?);
        }
    }
    Ok(rules)
}

fn online_settings(toml: &TomlConfig, no_interactive: bool) -> Result<OnlineSettings> {
    let online = &toml.online;

    let services = online
        .services
        .iter()
        .map(|name| name.parse::<ServiceKind>())
        .collect::<Result<Vec<_>>>()?;
    if services.is_empty() {
        return Err(ReconcileError::Config(
            "Online lookup enabled without any service".to_string(),
        ));
    }
    if online.n_parallel_requests == 0 {
        return Err(ReconcileError::Config(
            "n_parallel_requests must be greater than zero".to_string(),
        ));
    }
    if online.buffer_size == 0 {
        return Err(ReconcileError::Config(
            "buffer_size must be greater than zero".to_string(),
        ));
    }
    if online.requests_per_second == 0 {
        return Err(ReconcileError::Config(
            "requests_per_second must be greater than zero".to_string(),
        ));
    }
    if online.request_timeout_secs == 0 {
        return Err(ReconcileError::Config(
            "request_timeout_secs must be greater than zero".to_string(),
        ));
    }

    let request_timeout = Duration::from_secs(online.request_timeout_secs);
    Ok(OnlineSettings {
        services,
        service_options: ServiceOptions {
            request_timeout,
            requests_per_second: online.requests_per_second,
        },
        pipeline: PipelineConfig {
            n_suggestions: online.n_suggestions,
            n_parallel: online.n_parallel_requests,
            buffer_size: online.buffer_size,
            lookup_timeout: PipelineConfig::lookup_budget(request_timeout, online.n_suggestions),
        },
        interactive: online.interactive && !no_interactive,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibrec_common::config::OnlineConfig;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        cli: CliOverrides,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("paper.bib");
        std::fs::write(&input, "@misc{k, title={T}}").unwrap();
        let folder = dir.path().join("bib");
        std::fs::create_dir(&folder).unwrap();
        let cli = CliOverrides {
            input,
            bibliography_folder: Some(folder),
            ..CliOverrides::default()
        };
        Fixture { _dir: dir, cli }
    }

    #[test]
    fn test_defaults_resolve() {
        let f = fixture();
        let config = RunConfig::resolve(&f.cli, &TomlConfig::default()).unwrap();
        assert_eq!(config.output, f.cli.input);
        assert!(config.online.is_none());
        assert!(config.output_options.deduplicate);
        assert!(config.output_options.abbreviations.is_empty());
        let folder = f.cli.bibliography_folder.clone().unwrap();
        assert_eq!(config.index_source, IndexSource::Folder(folder.clone()));
        assert_eq!(config.cache_file, Some(folder.join("cache.json")));
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let mut f = fixture();
        f.cli.input = f.cli.input.with_file_name("absent.bib");
        let err = RunConfig::resolve(&f.cli, &TomlConfig::default()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_folder_is_fatal() {
        let mut f = fixture();
        f.cli.bibliography_folder = Some(PathBuf::from("/nonexistent/bibrec/folder"));
        assert!(RunConfig::resolve(&f.cli, &TomlConfig::default())
            .unwrap_err()
            .is_fatal());
    }

    #[test]
    fn test_unknown_service_is_fatal() {
        let f = fixture();
        let toml = TomlConfig {
            online: OnlineConfig {
                enable: true,
                services: vec!["dblp".into(), "scholar".into()],
                ..OnlineConfig::default()
            },
            ..TomlConfig::default()
        };
        assert!(RunConfig::resolve(&f.cli, &toml).unwrap_err().is_fatal());
    }

    #[test]
    fn test_zero_parallelism_is_fatal() {
        let mut f = fixture();
        f.cli.online = true;
        let toml = TomlConfig {
            online: OnlineConfig {
                n_parallel_requests: 0,
                ..OnlineConfig::default()
            },
            ..TomlConfig::default()
        };
        assert!(RunConfig::resolve(&f.cli, &toml).unwrap_err().is_fatal());
    }

    #[test]
    fn test_online_settings_from_toml() {
        let mut f = fixture();
        f.cli.online = true;
        f.cli.no_interactive = true;
        let config = RunConfig::resolve(&f.cli, &TomlConfig::default()).unwrap();
        let online = config.online.unwrap();
        assert_eq!(online.services, vec![ServiceKind::Dblp, ServiceKind::Crossref]);
        assert_eq!(online.pipeline.buffer_size, 15);
        assert_eq!(online.service_options.request_timeout, Duration::from_secs(10));
        assert_eq!(online.pipeline.lookup_timeout, Duration::from_secs(50));
        assert!(!online.interactive);
    }

    #[test]
    fn test_abbreviations_only_when_shortening() {
        let mut f = fixture();
        let toml = TomlConfig {
            abbreviations: vec![AbbreviationConfig {
                short: "ACL".into(),
                patterns: vec![r"^Proc\. .*ACL".into(), "^ACL".into()],
            }],
            ..TomlConfig::default()
        };
        let config = RunConfig::resolve(&f.cli, &toml).unwrap();
        assert!(config.output_options.abbreviations.is_empty());

        f.cli.shorten = true;
        let config = RunConfig::resolve(&f.cli, &toml).unwrap();
        assert_eq!(config.output_options.abbreviations.len(), 2);

        let bad = TomlConfig {
            shorten: true,
            abbreviations: vec![AbbreviationConfig {
                short: "X".into(),
                patterns: vec!["(".into()],
            }],
            ..TomlConfig::default()
        };
        assert!(RunConfig::resolve(&f.cli, &bad).unwrap_err().is_fatal());
    }

    #[test]
    fn test_no_deduplicate_overrides_toml() {
        let mut f = fixture();
        f.cli.no_deduplicate = true;
        let config = RunConfig::resolve(&f.cli, &TomlConfig::default()).unwrap();
        assert!(!config.output_options.deduplicate);

        f.cli.no_deduplicate = false;
        let toml = TomlConfig {
            deduplicate: false,
            ..TomlConfig::default()
        };
        assert!(!RunConfig::resolve(&f.cli, &toml).unwrap().output_options.deduplicate);
    }

    #[test]
    fn test_manifest_takes_precedence() {
        let mut f = fixture();
        let manifest = f.cli.input.with_file_name("bib_list.txt");
        std::fs::write(&manifest, "acl.json\n").unwrap();
        f.cli.manifest = Some(manifest.clone());
        f.cli.no_cache = true;
        let config = RunConfig::resolve(&f.cli, &TomlConfig::default()).unwrap();
        assert_eq!(config.index_source, IndexSource::Manifest(manifest));
        assert!(config.cache_file.is_none());
    }
}
