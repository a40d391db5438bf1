//! Output processor
//!
//! Deterministic assembly of the final bibliography, always in this order:
//! 1. optional sort by citation key
//! 2. dedup by citation key (first occurrence wins)
//! 3. dedup by serialized body without the key line (first wins, later ones
//!    reported as collisions)
//! 4. optional field removal
//! 5. optional abbreviation of `booktitle`/`journal`
//!
//! Content dedup compares every pair of surviving items. That is fine for a
//! document's bibliography (hundreds of entries) and does not scale beyond it.

use crate::bibtex::{serialize_entries, Entry};
use crate::error::{ReconcileError, Result};
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Fields abbreviation rules apply to
const ABBREVIATED_FIELDS: [&str; 2] = ["booktitle", "journal"];

/// Replace a venue matching `pattern` (anchored at the start) with `short`
#[derive(Debug, Clone)]
pub struct AbbreviationRule {
    pub short: String,
    pattern: Regex,
}

impl AbbreviationRule {
    pub fn new(short: impl Into<String>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            ReconcileError::Config(format!("Invalid abbreviation pattern {:?}: {}", pattern, e))
        })?;
        Ok(Self {
            short: short.into(),
            pattern,
        })
    }

    /// Prefix match: a match must begin at the first character
    pub fn matches(&self, value: &str) -> bool {
        self.pattern.find(value).is_some_and(|m| m.start() == 0)
    }
}

#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub sort: bool,
    pub deduplicate: bool,
    pub remove_fields: Vec<String>,
    /// Applied in order; the first matching rule wins per field
    pub abbreviations: Vec<AbbreviationRule>,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            sort: false,
            deduplicate: true,
            remove_fields: Vec::new(),
            abbreviations: Vec::new(),
        }
    }
}

/// Two distinct keys with identical content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentCollision {
    pub kept: String,
    pub dropped: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssembledOutput {
    pub entries: Vec<Entry>,
    /// Keys of items dropped because an earlier item had the same key
    pub duplicate_keys: Vec<String>,
    pub collisions: Vec<ContentCollision>,
}

impl AssembledOutput {
    pub fn to_bibtex(&self) -> String {
        serialize_entries(&self.entries)
    }
}

pub fn assemble(mut items: Vec<Entry>, options: &OutputOptions) -> AssembledOutput {
    let mut output = AssembledOutput::default();

    if options.sort {
        items.sort_by(|a, b| a.key.cmp(&b.key));
    }

    if options.deduplicate {
        let mut seen = HashSet::new();
        items.retain(|item| {
            if seen.insert(item.key.clone()) {
                true
            } else {
                debug!(key = %item.key, "Dropping duplicate key");
                output.duplicate_keys.push(item.key.clone());
                false
            }
        });

        let mut kept: Vec<(String, String)> = Vec::with_capacity(items.len());
        items.retain(|item| {
            let body = item.body();
            match kept.iter().find(|(_, other)| *other == body) {
                Some((kept_key, _)) => {
                    warn!(kept = %kept_key, dropped = %item.key, "Dropping entry with duplicate content");
                    output.collisions.push(ContentCollision {
                        kept: kept_key.clone(),
                        dropped: item.key.clone(),
                    });
                    false
                }
                None => {
                    kept.push((item.key.clone(), body));
                    true
                }
            }
        });
    }

    for item in &mut items {
        for name in &options.remove_fields {
            item.remove(name);
        }
        for field in ABBREVIATED_FIELDS {
            let short = item
                .get(field)
                .and_then(|value| options.abbreviations.iter().find(|r| r.matches(value)))
                .map(|rule| rule.short.clone());
            if let Some(short) = short {
                item.set(field, short);
            }
        }
    }

    output.entries = items;
    output
}
