//! arXiv fallback synthesizer
//!
//! Last-resort resolution for entries that matched neither the canonical index
//! nor an online candidate. The entry's source text is scanned for arXiv
//! identifiers; exactly one distinct identifier yields a normalized preprint
//! record, anything else leaves the entry untouched.

use crate::bibtex::Entry;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static ARXIV_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:arxiv:|arxiv\.org/abs/|arxiv\.org/pdf/)([0-9]{4})\.([0-9]{5})").unwrap()
});

/// Journal value of synthesized records
pub const ARXIV_JOURNAL: &str = "ArXiv preprint";

/// What the source text says about arXiv identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArxivEvidence {
    None,
    Unique(String),
    /// Several distinct identifiers; never guessed
    Ambiguous(Vec<String>),
}

/// Collect the distinct arXiv identifiers in `text`
pub fn scan(text: &str) -> ArxivEvidence {
    let ids: BTreeSet<String> = ARXIV_ID
        .captures_iter(text)
        .map(|c| format!("{}.{}", &c[1], &c[2]))
        .collect();

    match ids.len() {
        0 => ArxivEvidence::None,
        1 => ids
            .into_iter()
            .next()
            .map_or(ArxivEvidence::None, ArxivEvidence::Unique),
        _ => ArxivEvidence::Ambiguous(ids.into_iter().collect()),
    }
}

/// Build the normalized preprint record for `entry`, if its evidence is unique
///
/// Entry type and citation key are carried over; title and author are copied.
pub fn synthesize(entry: &Entry) -> Option<Entry> {
    let id = match scan(&entry.source_text()) {
        ArxivEvidence::Unique(id) => id,
        ArxivEvidence::None | ArxivEvidence::Ambiguous(_) => return None,
    };
    let year = format!("20{}", &id[..2]);

    let mut record = Entry::new(entry.entry_type.clone(), entry.key.clone());
    if let Some(title) = entry.title() {
        record.set("title", title);
    }
    if let Some(author) = entry.get("author") {
        record.set("author", author);
    }
    record.set("journal", ARXIV_JOURNAL);
    record.set("volume", format!("abs/{}", id));
    record.set("year", year);
    record.set("url", format!("https://arxiv.org/abs/{}", id));
    Some(record)
}
