//! Canonical database builder
//!
//! Converts a `.bib` file into the JSON database form used in manifest mode:
//! normalized title → the entry's source text as a line array.

use crate::bibtex::parse_bibliography;
use crate::error::Result;
use crate::normalize::normalize_title;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{info, warn};

/// Outcome of a database build
#[derive(Debug, Default)]
pub struct BuildReport {
    pub database: Map<String, Value>,
    /// Entries read from the source
    pub entries: usize,
    /// Entries skipped (unreadable or without a usable title)
    pub skipped: usize,
}

/// Build a JSON database from BibTeX text
///
/// Later entries with the same normalized title replace earlier ones.
pub fn build_database(text: &str) -> BuildReport {
    let parsed = parse_bibliography(text);
    let mut report = BuildReport {
        skipped: parsed.failures.len(),
        ..BuildReport::default()
    };

    for failure in &parsed.failures {
        warn!(line = failure.line, "Skipping unreadable entry: {}", failure.message);
    }

    for entry in parsed.entries {
        report.entries += 1;
        let key = entry.title().map(normalize_title).unwrap_or_default();
        if key.is_empty() {
            warn!(key = %entry.key, "Skipping entry without a usable title");
            report.skipped += 1;
            continue;
        }
        let source = entry.source_text();
        let lines = source
            .split_inclusive('\n')
            .map(|l| Value::String(l.to_string()))
            .collect();
        report.database.insert(key, Value::Array(lines));
    }

    report
}

/// Read `input`, build its database and write it as indented JSON to `output`
pub fn build_database_file(input: &Path, output: &Path) -> Result<BuildReport> {
    let text = std::fs::read_to_string(input)?;
    let report = build_database(&text);
    let json = serde_json::to_string_pretty(&report.database)?;
    std::fs::write(output, json)?;
    info!(
        input = %input.display(),
        output = %output.display(),
        records = report.database.len(),
        skipped = report.skipped,
        "Canonical database written"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{CanonicalIndex, CanonicalRecord, OfflineMatch};
    use crate::bibtex::Entry;

    const SOURCE: &str = "@inproceedings{devlin-etal-2019-bert,\n    title = \"{BERT}: Pre-training of Deep Bidirectional Transformers\",\n    booktitle = \"Proc. of NAACL\",\n    year = \"2019\",\n}\n\n@misc{notitle, note = {nothing}}\n";

    #[test]
    fn test_builds_line_records() {
        let report = build_database(SOURCE);
        assert_eq!(report.entries, 2);
        assert_eq!(report.skipped, 1);

        let record = &report.database["BERT Pre training of Deep Bidirectional Transformers"];
        let lines = record.as_array().unwrap();
        assert_eq!(lines[0], "@inproceedings{devlin-etal-2019-bert,\n");
        assert_eq!(lines.last().unwrap(), "}");
    }

    #[test]
    fn test_built_database_feeds_matcher() {
        let report = build_database(SOURCE);
        let records = report
            .database
            .iter()
            .map(|(k, v)| (k.clone(), CanonicalRecord::from_value(v).unwrap()));
        let index = CanonicalIndex::from_records(records);

        let input = Entry::new("article", "my-bert")
            .with_field("title", "BERT: Pre-training of Deep Bidirectional Transformers");
        let OfflineMatch::Matched(entry) = index.match_entry(&input) else {
            panic!("expected a match");
        };
        assert_eq!(entry.key, "my-bert");
        assert_eq!(entry.entry_type, "inproceedings");
        assert_eq!(entry.get("booktitle"), Some("Proc. of NAACL"));
    }
}
