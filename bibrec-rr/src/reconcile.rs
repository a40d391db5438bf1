//! Run orchestration
//!
//! input text → title check → offline match → online pipeline (or arXiv-only
//! fallback) → decisions merged back into input order → output assembly.

use crate::arxiv;
use crate::bibtex::{parse_bibliography, Entry};
use crate::config::RunConfig;
use crate::decision::{ProcessingCommand, UpdateMethod};
use crate::error::{ReconcileError, Result};
use crate::index::{CanonicalIndex, OfflineMatch};
use crate::lookup::build_services;
use crate::normalize::normalize_author;
use crate::output::{assemble, OutputOptions};
use crate::pipeline::{ChoiceResolver, ReferenceOrigin, ResolutionPipeline};
use chrono::{Local, NaiveDate};
use std::path::Path;
use tracing::{info, warn};

/// Counts reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Entries read from the input
    pub total: usize,
    /// Entries replaced from the canonical index
    pub converted_offline: usize,
    /// Entries replaced by an online candidate
    pub converted_online: usize,
    /// Entries replaced by a synthesized arXiv record
    pub arxiv_normalized: usize,
    pub kept: usize,
    /// Unreadable or title-less entries
    pub warnings: usize,
    pub duplicate_keys: usize,
    pub content_collisions: usize,
}

impl RunSummary {
    pub fn converted(&self) -> usize {
        self.converted_offline + self.converted_online + self.arxiv_normalized
    }
}

/// Output text plus counts
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub output: String,
    pub summary: RunSummary,
}

pub struct Reconciler {
    index: CanonicalIndex,
    options: OutputOptions,
    annotate_updates: bool,
    pipeline: Option<ResolutionPipeline>,
    date: NaiveDate,
}

impl Reconciler {
    /// Offline-only reconciler
    pub fn new(index: CanonicalIndex, options: OutputOptions) -> Self {
        Self {
            index,
            options,
            annotate_updates: true,
            pipeline: None,
            date: Local::now().date_naive(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: ResolutionPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_annotations(mut self, annotate: bool) -> Self {
        self.annotate_updates = annotate;
        self
    }

    /// Date recorded on updates (defaults to today)
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    /// Build from a validated run configuration
    ///
    /// Index construction runs on a blocking thread.
    pub async fn from_config(config: &RunConfig) -> Result<Self> {
        let source = config.index_source.clone();
        let cache = config.cache_file.clone();
        let index = tokio::task::spawn_blocking(move || CanonicalIndex::load(&source, cache.as_deref()))
            .await
            .map_err(|e| ReconcileError::Internal(format!("Index loading task failed: {}", e)))??;
        info!(records = index.len(), "Canonical index ready");

        let mut reconciler = Self::new(index, config.output_options.clone())
            .with_annotations(config.annotate_updates);

        if let Some(online) = &config.online {
            let services = build_services(&online.services, &online.service_options)?;
            reconciler = reconciler.with_pipeline(ResolutionPipeline::new(services, online.pipeline)?);
        }
        Ok(reconciler)
    }

    pub fn is_online(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Reconcile BibTeX text
    ///
    /// `resolver` decides unmatched entries when online lookups are configured;
    /// without them unmatched entries go straight to the arXiv fallback.
    pub async fn run<R>(&self, text: &str, resolver: R) -> Result<Reconciliation>
    where
        R: ChoiceResolver + 'static,
    {
        let parsed = parse_bibliography(text);
        let mut summary = RunSummary {
            total: parsed.entries.len() + parsed.failures.len(),
            ..RunSummary::default()
        };

        for failure in &parsed.failures {
            warn!(line = failure.line, "Warning: skipping unreadable entry: {}", failure.message);
            summary.warnings += 1;
        }

        let mut commands: Vec<Option<ProcessingCommand>> = vec![None; parsed.entries.len()];
        let mut unmatched: Vec<(usize, Entry)> = Vec::new();

        for (slot, entry) in parsed.entries.into_iter().enumerate() {
            let Some(title) = entry.title().map(str::to_string) else {
                warn!(key = %entry.key, "Warning: entry has no title, kept unchanged");
                summary.warnings += 1;
                commands[slot] = Some(ProcessingCommand::Keep(entry));
                continue;
            };

            match self.index.match_entry(&entry) {
                OfflineMatch::Matched(canonical) => {
                    info!(key = %entry.key, title = %normalize_author(&title), "Converted");
                    summary.converted_offline += 1;
                    commands[slot] = Some(ProcessingCommand::Update {
                        old: entry,
                        new: canonical,
                        method: UpdateMethod::Automated,
                        date: self.date,
                    });
                }
                OfflineMatch::Unmatched => unmatched.push((slot, entry)),
            }
        }

        match &self.pipeline {
            Some(pipeline) if !unmatched.is_empty() => {
                let (slots, entries): (Vec<usize>, Vec<Entry>) = unmatched.into_iter().unzip();
                let outcome = pipeline.run(entries.clone(), resolver).await?;

                let mut choices = outcome.choices.into_iter();
                for (slot, entry) in slots.into_iter().zip(entries) {
                    let command = match choices.next() {
                        Some(choice) => {
                            let origin = choice.chosen.origin.clone();
                            let command = ProcessingCommand::from_choice(choice, outcome.method, self.date);
                            if command.is_update() {
                                match origin {
                                    ReferenceOrigin::Arxiv => {
                                        info!(key = %entry.key, "Normalized arXiv entry");
                                        summary.arxiv_normalized += 1;
                                    }
                                    _ => {
                                        info!(key = %entry.key, "Converted online");
                                        summary.converted_online += 1;
                                    }
                                }
                            } else {
                                info!(key = %entry.key, "Kept");
                                summary.kept += 1;
                            }
                            command
                        }
                        None => {
                            info!(key = %entry.key, "Kept");
                            summary.kept += 1;
                            ProcessingCommand::Keep(entry)
                        }
                    };
                    commands[slot] = Some(command);
                }
            }
            _ => {
                for (slot, entry) in unmatched {
                    let command = match arxiv::synthesize(&entry) {
                        Some(record) => {
                            info!(key = %entry.key, "Normalized arXiv entry");
                            summary.arxiv_normalized += 1;
                            ProcessingCommand::Update {
                                old: entry,
                                new: record,
                                method: UpdateMethod::Automated,
                                date: self.date,
                            }
                        }
                        None => {
                            info!(key = %entry.key, "Kept");
                            summary.kept += 1;
                            ProcessingCommand::Keep(entry)
                        }
                    };
                    commands[slot] = Some(command);
                }
            }
        }

        let items: Vec<Entry> = commands
            .iter()
            .flatten()
            .map(|command| command.output(self.annotate_updates))
            .collect();
        let assembled = assemble(items, &self.options);
        summary.duplicate_keys = assembled.duplicate_keys.len();
        summary.content_collisions = assembled.collisions.len();

        info!(
            converted = summary.converted(),
            kept = summary.kept,
            warnings = summary.warnings,
            "Num of converted items: {}",
            summary.converted()
        );

        Ok(Reconciliation {
            output: assembled.to_bibtex(),
            summary,
        })
    }

    /// Reconcile `input` and write the result to `output`
    pub async fn run_file<R>(&self, input: &Path, output: &Path, resolver: R) -> Result<RunSummary>
    where
        R: ChoiceResolver + 'static,
    {
        let text = tokio::fs::read_to_string(input).await?;
        let result = self.run(&text, resolver).await?;
        tokio::fs::write(output, result.output).await?;
        info!(output = %output.display(), "Written");
        Ok(result.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::NOTE_FIELD;
    use crate::index::CanonicalRecord;
    use crate::lookup::mock::MockLookupService;
    use crate::pipeline::{AutomatedResolver, KeepCurrentResolver, PipelineConfig};
    use std::sync::Arc;

    const INPUT: &str = r#"
@article{Smith21,
  title = {Deep Learning!},
  author = {Smith, John},
}

@misc{Preprint1,
  title = {A Preprint},
  author = {Doe, Jane},
  note = {arXiv:2101.00001},
}

@misc{NoTitle,
  note = {nothing to match},
}

@article{Unknown,
  title = {Something Else},
}
"#;

    fn index() -> CanonicalIndex {
        CanonicalIndex::from_records([(
            "Deep Learning".to_string(),
            CanonicalRecord::Fields(
                Entry::new("article", "lecun2015")
                    .with_field("title", "Deep Learning")
                    .with_field("journal", "Nature")
                    .with_field("year", "2015"),
            ),
        )])
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    #[tokio::test]
    async fn test_offline_run_keeps_input_order() {
        let reconciler = Reconciler::new(index(), OutputOptions::default()).with_date(date());
        let result = reconciler.run(INPUT, KeepCurrentResolver).await.unwrap();

        let parsed = parse_bibliography(&result.output);
        let keys: Vec<&str> = parsed.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["Smith21", "Preprint1", "NoTitle", "Unknown"]);

        let smith = &parsed.entries[0];
        assert_eq!(smith.get("journal"), Some("Nature"));
        assert_eq!(smith.get(NOTE_FIELD), Some("automated update on 2024-01-02"));

        let preprint = &parsed.entries[1];
        assert_eq!(preprint.get("journal"), Some("ArXiv preprint"));
        assert_eq!(preprint.get("year"), Some("2021"));

        assert_eq!(
            result.summary,
            RunSummary {
                total: 4,
                converted_offline: 1,
                converted_online: 0,
                arxiv_normalized: 1,
                kept: 1,
                warnings: 1,
                duplicate_keys: 0,
                content_collisions: 0,
            }
        );
        assert_eq!(result.summary.converted(), 2);
    }

    #[tokio::test]
    async fn test_online_run_merges_back_in_order() {
        let service = Arc::new(MockLookupService::new(
            "mock",
            vec![Entry::new("inproceedings", "DBLP:x")
                .with_field("title", "Something Else")
                .with_field("booktitle", "ACL")],
        ));
        let pipeline = ResolutionPipeline::new(vec![service], PipelineConfig::default()).unwrap();
        let reconciler = Reconciler::new(index(), OutputOptions::default())
            .with_pipeline(pipeline)
            .with_annotations(false)
            .with_date(date());

        let result = reconciler.run(INPUT, AutomatedResolver).await.unwrap();
        let parsed = parse_bibliography(&result.output);
        let keys: Vec<&str> = parsed.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["Smith21", "Preprint1", "NoTitle", "Unknown"]);

        let unknown = &parsed.entries[3];
        assert_eq!(unknown.entry_type, "inproceedings");
        assert_eq!(unknown.get("booktitle"), Some("ACL"));
        assert_eq!(unknown.get(NOTE_FIELD), None);

        assert_eq!(result.summary.converted_online, 1);
        assert_eq!(result.summary.arxiv_normalized, 1);
        assert_eq!(result.summary.converted_offline, 1);
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_warning() {
        let reconciler = Reconciler::new(CanonicalIndex::new(), OutputOptions::default());
        let result = reconciler
            .run("@article{title = {No key}}\n@misc{Ok, title = {Fine}}", KeepCurrentResolver)
            .await
            .unwrap();
        assert_eq!(result.summary.warnings, 1);
        assert_eq!(result.summary.kept, 1);
        assert_eq!(result.output, "@misc{Ok,\n  title = {Fine},\n}");
    }
}
