//! Canonical index and offline matcher
//!
//! Read-only mapping from normalized title to a trusted record, built once per
//! run from flat files and optionally restored from a snapshot validated by
//! content hashes.
//!
//! # Sources
//! - **Manifest mode:** a text file listing JSON databases, one per line,
//!   relative to the manifest's folder.
//! - **Folder mode:** every `*.bib` file in a folder, in file-name order.
//!
//! In both modes a later file silently overwrites an earlier one on a title
//! collision.

pub mod builder;
pub mod snapshot;

use crate::bibtex::{parse_bibliography, Entry};
use crate::error::{ReconcileError, Result};
use crate::normalize::normalize_title;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A trusted bibliography record
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalRecord {
    /// Pre-serialized BibTeX text, one element per source line
    Lines(Vec<String>),
    /// Parsed record
    Fields(Entry),
}

impl CanonicalRecord {
    /// Decode from the JSON database form (line array or field map)
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        ReconcileError::IndexInconsistency(
                            "line array contains a non-string element".to_string(),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(CanonicalRecord::Lines),
            Value::Object(map) => Entry::from_field_map(map)
                .map(CanonicalRecord::Fields)
                .map_err(|e| ReconcileError::IndexInconsistency(e.to_string())),
            _ => Err(ReconcileError::IndexInconsistency(
                "record is neither a line array nor a field map".to_string(),
            )),
        }
    }

    /// Encode to the JSON database form
    pub fn to_value(&self) -> Value {
        match self {
            CanonicalRecord::Lines(lines) => {
                Value::Array(lines.iter().cloned().map(Value::String).collect())
            }
            CanonicalRecord::Fields(entry) => Value::Object(entry.to_field_map()),
        }
    }

    /// Materialize the record under a different citation key
    ///
    /// Line records are re-keyed by substituting the first key occurrence in
    /// the header, then read back. A header without the expected delimiters is
    /// an index inconsistency.
    pub fn rekeyed(&self, key: &str) -> Result<Entry> {
        match self {
            CanonicalRecord::Fields(entry) => {
                let mut entry = entry.clone();
                entry.key = key.to_string();
                Ok(entry)
            }
            CanonicalRecord::Lines(lines) => {
                let text = substitute_key(lines, key)?;
                let mut parsed = parse_bibliography(&text);
                if parsed.entries.is_empty() {
                    let reason = parsed
                        .failures
                        .first()
                        .map(|f| f.message.clone())
                        .unwrap_or_else(|| "no entry found".to_string());
                    return Err(ReconcileError::IndexInconsistency(format!(
                        "re-keyed record does not parse: {}",
                        reason
                    )));
                }
                Ok(parsed.entries.swap_remove(0))
            }
        }
    }
}

/// Replace the citation key in the header line of a pre-serialized record
fn substitute_key(lines: &[String], key: &str) -> Result<String> {
    let mut lines: Vec<String> = lines
        .iter()
        .map(|l| l.trim_end_matches(['\r', '\n']).to_string())
        .collect();

    let header_idx = lines
        .iter()
        .position(|l| l.trim_start().starts_with('@'))
        .ok_or_else(|| ReconcileError::IndexInconsistency("no '@' header line".to_string()))?;

    let header = &lines[header_idx];
    let open = header.find(['{', '(']).ok_or_else(|| {
        ReconcileError::IndexInconsistency(format!("header without opening delimiter: {}", header))
    })?;
    let after = &header[open + 1..];

    if after.trim().is_empty() {
        // Key sits on the following line
        let next = lines.get(header_idx + 1).ok_or_else(|| {
            ReconcileError::IndexInconsistency("header is the last line".to_string())
        })?;
        let comma = next.find(',').ok_or_else(|| {
            ReconcileError::IndexInconsistency(format!("key line without ',': {}", next))
        })?;
        let indent = next.len() - next.trim_start().len();
        let replaced = format!("{}{}{}", &next[..indent], key, &next[comma..]);
        lines[header_idx + 1] = replaced;
    } else {
        let comma = after.find(',').ok_or_else(|| {
            ReconcileError::IndexInconsistency(format!("header without ',': {}", header))
        })?;
        let replaced = format!("{}{}{}", &header[..=open], key, &after[comma..]);
        lines[header_idx] = replaced;
    }

    Ok(lines.join("\n"))
}

/// Where canonical records come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSource {
    /// Text file listing JSON database files
    Manifest(PathBuf),
    /// Folder of `*.bib` files
    Folder(PathBuf),
}

impl IndexSource {
    /// Default snapshot location next to the sources
    pub fn default_cache_file(&self) -> PathBuf {
        match self {
            IndexSource::Manifest(path) => path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("cache.json"),
            IndexSource::Folder(dir) => dir.join("cache.json"),
        }
    }

    /// Candidate files in load order
    ///
    /// A missing source or a manifest naming a missing file is a configuration
    /// error.
    pub fn candidate_files(&self) -> Result<Vec<PathBuf>> {
        match self {
            IndexSource::Manifest(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    ReconcileError::Config(format!(
                        "Failed to read manifest {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(|l| {
                        let file = base.join(l);
                        if file.is_file() {
                            Ok(file)
                        } else {
                            Err(ReconcileError::Config(format!(
                                "Manifest {} lists missing file {}",
                                path.display(),
                                file.display()
                            )))
                        }
                    })
                    .collect()
            }
            IndexSource::Folder(dir) => {
                if !dir.is_dir() {
                    return Err(ReconcileError::Config(format!(
                        "Bibliography folder not found: {}",
                        dir.display()
                    )));
                }
                let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
                    .max_depth(1)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .map(|e| e.into_path())
                    .filter(|p| p.extension().is_some_and(|ext| ext == "bib"))
                    .collect();
                files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
                Ok(files)
            }
        }
    }
}

/// Result of looking an input entry up in the canonical index
#[derive(Debug, Clone, PartialEq)]
pub enum OfflineMatch {
    /// Canonical record, already re-keyed to the input entry's key
    Matched(Entry),
    Unmatched,
}

/// Read-only mapping from normalized title to canonical record
#[derive(Debug, Clone, Default)]
pub struct CanonicalIndex {
    records: HashMap<String, CanonicalRecord>,
}

impl CanonicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already-decoded records; later pairs overwrite earlier ones
    pub fn from_records(records: impl IntoIterator<Item = (String, CanonicalRecord)>) -> Self {
        let mut index = Self::new();
        for (title, record) in records {
            index.insert(&title, record);
        }
        index
    }

    /// Insert under the normalized form of `title`
    fn insert(&mut self, title: &str, record: CanonicalRecord) {
        let key = normalize_title(title);
        if key.is_empty() {
            return;
        }
        if self.records.insert(key.clone(), record).is_some() {
            debug!(title = %key, "Canonical record overwritten by later source");
        }
    }

    /// Load from a source, reusing the snapshot when every file hash matches
    pub fn load(source: &IndexSource, cache_file: Option<&Path>) -> Result<Self> {
        let files = source.candidate_files()?;
        let hashes = snapshot::hash_files(&files)?;

        if let Some(cache) = cache_file {
            if let Some(snap) = snapshot::IndexSnapshot::read(cache) {
                if snap.file_hashes == hashes {
                    info!(cache = %cache.display(), "Using cached pre-processed entries");
                    return Ok(snap.into_index());
                }
                info!("Canonical sources changed, rebuilding index");
            }
        }

        let index = match source {
            IndexSource::Manifest(_) => Self::build_from_json_files(&files)?,
            IndexSource::Folder(_) => Self::build_from_bib_files(&files)?,
        };

        if let Some(cache) = cache_file {
            let snap = snapshot::IndexSnapshot::from_index(hashes, &index);
            match snap.write(cache) {
                Ok(()) => info!(cache = %cache.display(), "Saved pre-processed entries"),
                Err(e) => warn!(cache = %cache.display(), error = %e, "Failed to save index snapshot"),
            }
        }

        Ok(index)
    }

    /// Build from JSON databases (normalized title → line array or field map)
    pub fn build_from_json_files(files: &[PathBuf]) -> Result<Self> {
        let mut index = Self::new();
        for file in files {
            let content = std::fs::read_to_string(file)?;
            let db: Map<String, Value> = serde_json::from_str(&content)?;
            let size = db.len();
            for (title, value) in db {
                match CanonicalRecord::from_value(&value) {
                    Ok(record) => index.insert(&title, record),
                    Err(e) => warn!(
                        file = %file.display(),
                        title = %title,
                        error = %e,
                        "Skipping malformed canonical record"
                    ),
                }
            }
            info!(file = %file.display(), size, "Loaded canonical database");
        }
        Ok(index)
    }

    /// Build from BibTeX files, keyed by each entry's normalized title
    pub fn build_from_bib_files(files: &[PathBuf]) -> Result<Self> {
        let mut index = Self::new();
        for file in files {
            let content = std::fs::read_to_string(file)?;
            let parsed = parse_bibliography(&content);
            for failure in &parsed.failures {
                warn!(
                    file = %file.display(),
                    line = failure.line,
                    "Skipping unreadable canonical entry: {}",
                    failure.message
                );
            }
            let size = parsed.entries.len();
            for entry in parsed.entries {
                match entry.title().map(str::to_string) {
                    Some(title) => index.insert(&title, CanonicalRecord::Fields(entry)),
                    None => debug!(key = %entry.key, "Canonical entry without title ignored"),
                }
            }
            info!(file = %file.display(), size, "Loaded canonical bibliography");
        }
        Ok(index)
    }

    /// O(1) lookup by normalized title
    pub fn lookup(&self, normalized_title: &str) -> Option<&CanonicalRecord> {
        self.records.get(normalized_title)
    }

    /// Match an input entry by its normalized title
    ///
    /// A malformed canonical record is skipped with a diagnostic and the entry
    /// stays unmatched.
    pub fn match_entry(&self, entry: &Entry) -> OfflineMatch {
        let Some(title) = entry.title() else {
            return OfflineMatch::Unmatched;
        };
        let key = normalize_title(title);
        if key.is_empty() {
            return OfflineMatch::Unmatched;
        }

        match self.lookup(&key) {
            None => OfflineMatch::Unmatched,
            Some(record) => match record.rekeyed(&entry.key) {
                Ok(matched) => OfflineMatch::Matched(matched),
                Err(e) => {
                    warn!(key = %entry.key, title = %key, error = %e, "Skipping inconsistent canonical record");
                    OfflineMatch::Unmatched
                }
            },
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = (&String, &CanonicalRecord)> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.split_inclusive('\n').map(str::to_string).collect()
    }

    #[test]
    fn test_match_rekeys_field_record() {
        let canonical = Entry::new("inproceedings", "lecun2015deep")
            .with_field("title", "Deep Learning")
            .with_field("booktitle", "Nature");
        let index = CanonicalIndex::from_records([(
            "Deep Learning".to_string(),
            CanonicalRecord::Fields(canonical),
        )]);

        let input = Entry::new("article", "Smith21").with_field("title", "Deep Learning!");
        match index.match_entry(&input) {
            OfflineMatch::Matched(entry) => {
                assert_eq!(entry.key, "Smith21");
                assert_eq!(entry.entry_type, "inproceedings");
                assert_eq!(entry.get("booktitle"), Some("Nature"));
            }
            OfflineMatch::Unmatched => panic!("expected a match"),
        }
    }

    #[test]
    fn test_match_rekeys_line_record() {
        let record = CanonicalRecord::Lines(lines(
            "@inproceedings{orig-key,\n    title = \"Deep Learning\",\n    author = \"LeCun, Yann\",\n}\n",
        ));
        let index = CanonicalIndex::from_records([("Deep Learning".to_string(), record)]);

        let input = Entry::new("article", "Smith21").with_field("title", "deep learning");
        // Case differs: keys are case-sensitive
        assert_eq!(index.match_entry(&input), OfflineMatch::Unmatched);

        let input = Entry::new("article", "Smith21").with_field("title", "Deep  Learning.");
        let OfflineMatch::Matched(entry) = index.match_entry(&input) else {
            panic!("expected a match");
        };
        assert_eq!(entry.key, "Smith21");
        assert_eq!(entry.get("author"), Some("LeCun, Yann"));
    }

    #[test]
    fn test_key_on_next_line() {
        let text = substitute_key(&lines("@article{\n  oldkey,\n  title = {T},\n}\n"), "New1").unwrap();
        assert_eq!(text, "@article{\n  New1,\n  title = {T},\n}");
    }

    #[test]
    fn test_only_first_key_occurrence_replaced() {
        let text = substitute_key(
            &lines("@misc{dup,\n  note = {dup},\n}\n"),
            "K",
        )
        .unwrap();
        assert_eq!(text, "@misc{K,\n  note = {dup},\n}");
    }

    #[test]
    fn test_inconsistent_record_is_skipped() {
        let broken = CanonicalRecord::Lines(lines("title = {Deep Learning}\n"));
        let index = CanonicalIndex::from_records([("Deep Learning".to_string(), broken)]);
        let input = Entry::new("article", "Smith21").with_field("title", "Deep Learning");
        assert_eq!(index.match_entry(&input), OfflineMatch::Unmatched);

        let no_comma = CanonicalRecord::Lines(lines("@article{nokey\n"));
        assert!(matches!(
            no_comma.rekeyed("X"),
            Err(ReconcileError::IndexInconsistency(_))
        ));
    }

    #[test]
    fn test_later_record_wins() {
        let first = Entry::new("article", "a").with_field("title", "Same").with_field("year", "2001");
        let second = Entry::new("article", "b").with_field("title", "Same").with_field("year", "2002");
        let index = CanonicalIndex::from_records([
            ("Same".to_string(), CanonicalRecord::Fields(first)),
            ("Same".to_string(), CanonicalRecord::Fields(second.clone())),
        ]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup("Same"), Some(&CanonicalRecord::Fields(second)));
    }

    #[test]
    fn test_record_value_forms() {
        let lines_value = serde_json::json!(["@article{k,\n", "title={T}\n", "}\n"]);
        assert!(matches!(
            CanonicalRecord::from_value(&lines_value).unwrap(),
            CanonicalRecord::Lines(l) if l.len() == 3
        ));

        let map_value = serde_json::json!({"ENTRYTYPE": "article", "ID": "k", "title": "T"});
        let record = CanonicalRecord::from_value(&map_value).unwrap();
        assert_eq!(record.to_value(), map_value);

        assert!(CanonicalRecord::from_value(&serde_json::json!(42)).is_err());
        assert!(CanonicalRecord::from_value(&serde_json::json!(["ok", 1])).is_err());
    }

    #[test]
    fn test_title_less_entry_unmatched() {
        let index = CanonicalIndex::from_records([(
            "T".to_string(),
            CanonicalRecord::Fields(Entry::new("misc", "k").with_field("title", "T")),
        )]);
        assert_eq!(index.match_entry(&Entry::new("misc", "x")), OfflineMatch::Unmatched);
    }
}
