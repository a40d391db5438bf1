//! bibrec-rr - Bibliography reconciler
//!
//! Replaces citation entries with curated canonical records, resolving the
//! rest through online lookup services or the arXiv fallback.
//!
//! # Subcommands
//! - `reconcile`: reconcile a `.bib` file against the canonical sources
//! - `build-db`: convert a `.bib` file into a canonical JSON database

use anyhow::{Context, Result};
use bibrec_common::config::{load_or_default, LoggingConfig};
use bibrec_rr::config::{CliOverrides, RunConfig};
use bibrec_rr::index::builder::build_database_file;
use bibrec_rr::pipeline::{AutomatedResolver, InteractiveResolver, KeepCurrentResolver};
use bibrec_rr::reconcile::{Reconciler, RunSummary};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for bibrec-rr
#[derive(Parser, Debug)]
#[command(name = "bibrec-rr")]
#[command(about = "Reconcile bibliography entries against curated canonical records")]
#[command(version)]
struct Args {
    /// TOML configuration file (default: platform config directory)
    #[arg(short, long, global = true, env = "BIBREC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile a BibTeX file
    Reconcile {
        /// Input BibTeX file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (default: overwrite the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Folder of canonical *.bib files
        #[arg(short, long, env = "BIBREC_BIBLIOGRAPHY_FOLDER")]
        bibliography_folder: Option<PathBuf>,

        /// Manifest listing canonical JSON databases (overrides the folder)
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Sort output entries by citation key
        #[arg(long)]
        sort: bool,

        /// Keep entries with duplicate keys or duplicate content
        #[arg(long)]
        no_deduplicate: bool,

        /// Abbreviate venues using the configured rules
        #[arg(long)]
        shorten: bool,

        /// Field to strip from every output entry (repeatable)
        #[arg(short, long = "remove-field", value_name = "FIELD")]
        remove_fields: Vec<String>,

        /// Query online services for unmatched entries
        #[arg(long)]
        online: bool,

        /// Decide online candidates automatically instead of prompting
        #[arg(long)]
        no_interactive: bool,

        /// Neither read nor write the index snapshot
        #[arg(long)]
        no_cache: bool,
    },

    /// Build a canonical JSON database from a BibTeX file
    BuildDb {
        /// Input BibTeX file
        #[arg(short, long)]
        input: PathBuf,

        /// Output JSON database
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loaded = load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&loaded.config.logging)?;

    info!("Starting bibrec-rr {}", env!("CARGO_PKG_VERSION"));
    match &loaded.source {
        Some(path) => info!("Loaded TOML configuration from {}", path.display()),
        None => warn!("No config file found, using built-in defaults"),
    }
    let toml_config = loaded.config;

    match args.command {
        Command::Reconcile {
            input,
            output,
            bibliography_folder,
            manifest,
            sort,
            no_deduplicate,
            shorten,
            remove_fields,
            online,
            no_interactive,
            no_cache,
        } => {
            let cli = CliOverrides {
                input,
                output,
                bibliography_folder,
                manifest,
                sort,
                no_deduplicate,
                shorten,
                remove_fields,
                online,
                no_interactive,
                no_cache,
            };
            let config = RunConfig::resolve(&cli, &toml_config).context("Invalid configuration")?;
            let summary = reconcile(&config).await?;
            print_summary(&summary, &config);
        }
        Command::BuildDb { input, output } => {
            let report = build_database_file(&input, &output)
                .with_context(|| format!("Failed to build database from {}", input.display()))?;
            println!(
                "Entries: {}  Records: {}  Skipped: {}",
                report.entries,
                report.database.len(),
                report.skipped
            );
        }
    }

    Ok(())
}

async fn reconcile(config: &RunConfig) -> Result<RunSummary> {
    let reconciler = Reconciler::from_config(config)
        .await
        .context("Failed to prepare reconciler")?;

    let (input, output) = (config.input.as_path(), config.output.as_path());
    let summary = match &config.online {
        Some(online) if online.interactive => {
            let resolver = InteractiveResolver::new(BufReader::new(std::io::stdin()), std::io::stdout());
            reconciler.run_file(input, output, resolver).await
        }
        Some(_) => reconciler.run_file(input, output, AutomatedResolver).await,
        None => reconciler.run_file(input, output, KeepCurrentResolver).await,
    }
    .context("Reconciliation failed")?;

    Ok(summary)
}

fn print_summary(summary: &RunSummary, config: &RunConfig) {
    println!("Num of converted items: {}", summary.converted());
    println!(
        "  canonical: {}  online: {}  arXiv: {}  kept: {}  warnings: {}",
        summary.converted_offline,
        summary.converted_online,
        summary.arxiv_normalized,
        summary.kept,
        summary.warnings
    );
    if summary.duplicate_keys > 0 || summary.content_collisions > 0 {
        println!(
            "  dropped duplicate keys: {}  dropped duplicate content: {}",
            summary.duplicate_keys, summary.content_collisions
        );
    }
    println!("Written to: {}", config.output.display());
}

/// RUST_LOG wins over the configured level; a log file replaces stderr
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let (stderr_layer, file_layer) = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (None, Some(layer))
        }
        None => (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}
