//! Decision stage
//!
//! Turns each resolved pairing into a [`ProcessingCommand`] carrying its
//! provenance. Updates keep the input's citation key so references in the
//! user's document stay valid.

use crate::bibtex::Entry;
use crate::pipeline::{ReferenceChoice, ReferenceOrigin};
use chrono::NaiveDate;
use std::fmt;

/// Field recording where an updated entry came from
pub const NOTE_FIELD: &str = "bibrec_note";

/// Who decided an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMethod {
    Automated,
    Manual,
}

impl fmt::Display for UpdateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateMethod::Automated => write!(f, "automated"),
            UpdateMethod::Manual => write!(f, "manual"),
        }
    }
}

/// Action applied when producing the output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingCommand {
    Keep(Entry),
    Update {
        old: Entry,
        new: Entry,
        method: UpdateMethod,
        date: NaiveDate,
    },
}

impl ProcessingCommand {
    /// Keep when the choice is the current reference, update otherwise
    ///
    /// Synthesized arXiv records are always automated updates.
    pub fn from_choice(choice: ReferenceChoice, method: UpdateMethod, date: NaiveDate) -> Self {
        if choice.is_keep() {
            return ProcessingCommand::Keep(choice.current.entry);
        }
        let method = match choice.chosen.origin {
            ReferenceOrigin::Arxiv => UpdateMethod::Automated,
            _ => method,
        };
        ProcessingCommand::Update {
            old: choice.current.entry,
            new: choice.chosen.entry,
            method,
            date,
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, ProcessingCommand::Update { .. })
    }

    /// The entry written to the output
    ///
    /// An update takes the new record under the old key, plus a provenance
    /// note when `annotate` is set.
    pub fn output(&self, annotate: bool) -> Entry {
        match self {
            ProcessingCommand::Keep(entry) => entry.clone(),
            ProcessingCommand::Update {
                old,
                new,
                method,
                date,
            } => {
                let mut entry = new.clone();
                entry.key = old.key.clone();
                if annotate {
                    entry.set(
                        NOTE_FIELD,
                        format!("{} update on {}", method, date.format("%Y-%m-%d")),
                    );
                }
                entry
            }
        }
    }
}
