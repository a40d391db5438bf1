//! Bibliography entries, a minimal BibTeX reader and the BibTeX writer
//!
//! The reader covers the data contract the reconciler relies on: entry type,
//! citation key and an ordered field list, with each entry's source text kept
//! for identifier scanning. It is deliberately not a full BibTeX grammar:
//! `@string` macros are not expanded and `#` concatenations are kept verbatim.
//!
//! # Serialization
//! ```text
//! @article{Smith21,
//!   title = {Deep Learning},
//!   year = {2021},
//! }
//! ```

use crate::error::{ReconcileError, Result};
use serde_json::{Map, Value};
use std::borrow::Cow;
use tracing::debug;

/// Field-map key holding the entry type
pub const ENTRY_TYPE_KEY: &str = "ENTRYTYPE";
/// Field-map key holding the citation key
pub const ID_KEY: &str = "ID";

/// A parsed citation record
///
/// Field order is preserved for faithful re-serialization. Equality ignores
/// the retained source text.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Entry type, lower-case (`article`, `inproceedings`, ...)
    pub entry_type: String,
    /// Citation key, never empty for entries produced by the reader
    pub key: String,
    fields: Vec<(String, String)>,
    raw: Option<String>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.entry_type == other.entry_type && self.key == other.key && self.fields == other.fields
    }
}

impl Eq for Entry {}

impl Entry {
    pub fn new(entry_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            entry_type: entry_type.into().to_lowercase(),
            key: key.into(),
            fields: Vec::new(),
            raw: None,
        }
    }

    /// Builder-style field append (replaces an existing field in place)
    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Field value by (case-insensitive) name
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set a field, keeping its position when it already exists
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_lowercase();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Remove a field, returning its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let name = name.to_lowercase();
        let idx = self.fields.iter().position(|(n, _)| *n == name)?;
        Some(self.fields.remove(idx).1)
    }

    /// Fields in original order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn title(&self) -> Option<&str> {
        self.get("title")
    }

    /// Source text this entry was read from, if any
    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    pub fn set_raw(&mut self, raw: impl Into<String>) {
        self.raw = Some(raw.into());
    }

    /// Source text, or the serialized form for entries built in code
    pub fn source_text(&self) -> Cow<'_, str> {
        match &self.raw {
            Some(raw) => Cow::Borrowed(raw.as_str()),
            None => Cow::Owned(self.to_bibtex()),
        }
    }

    /// Serialize as one BibTeX record without a trailing newline
    pub fn to_bibtex(&self) -> String {
        let mut out = format!("@{}{{{},\n", self.entry_type, self.key);
        out.push_str(&self.body());
        out.push('}');
        out
    }

    /// Serialized field lines, i.e. the record without its key line
    pub fn body(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.fields {
            out.push_str(&format!("  {} = {{{}}},\n", name, value));
        }
        out
    }

    /// Convert to the field-map form (`ENTRYTYPE`, `ID`, then fields)
    pub fn to_field_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(ENTRY_TYPE_KEY.to_string(), Value::String(self.entry_type.clone()));
        map.insert(ID_KEY.to_string(), Value::String(self.key.clone()));
        for (name, value) in &self.fields {
            map.insert(name.clone(), Value::String(value.clone()));
        }
        map
    }

    /// Build from the field-map form
    ///
    /// Non-string field values are rendered as their JSON text.
    pub fn from_field_map(map: &Map<String, Value>) -> Result<Self> {
        let entry_type = map
            .get(ENTRY_TYPE_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| ReconcileError::Parse("field map without ENTRYTYPE".to_string()))?;
        let key = map
            .get(ID_KEY)
            .and_then(Value::as_str)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ReconcileError::Parse("field map without ID".to_string()))?;

        let mut entry = Entry::new(entry_type, key.trim());
        for (name, value) in map {
            if name == ENTRY_TYPE_KEY || name == ID_KEY {
                continue;
            }
            match value {
                Value::String(s) => entry.set(name, s.clone()),
                other => entry.set(name, other.to_string()),
            }
        }
        Ok(entry)
    }
}

/// Serialize records separated by one blank line, without a trailing blank line
pub fn serialize_entries<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> String {
    entries
        .into_iter()
        .map(Entry::to_bibtex)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// An entry the reader could not use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    /// 1-based line of the entry's `@`
    pub line: usize,
    pub message: String,
}

/// Reader output: usable entries plus the skipped ones
#[derive(Debug, Clone, Default)]
pub struct ParsedBibliography {
    pub entries: Vec<Entry>,
    pub failures: Vec<ParseFailure>,
}

/// Read every entry from BibTeX text
pub fn parse_bibliography(text: &str) -> ParsedBibliography {
    let bytes = text.as_bytes();
    let mut result = ParsedBibliography::default();
    let mut pos = 0;
    let mut line = 1;
    let mut counted = 0;

    while let Some(offset) = text[pos..].find('@') {
        let start = pos + offset;
        line += text[counted..start].matches('\n').count();
        counted = start;
        let mut cursor = start + 1;

        while cursor < bytes.len()
            && (bytes[cursor].is_ascii_alphanumeric() || bytes[cursor] == b'_' || bytes[cursor] == b'-')
        {
            cursor += 1;
        }
        let entry_type = text[start + 1..cursor].to_lowercase();
        if entry_type.is_empty() {
            pos = start + 1;
            continue;
        }

        cursor = skip_whitespace(bytes, cursor);
        let closer = match bytes.get(cursor) {
            Some(b'{') => b'}',
            Some(b'(') => b')',
            _ => {
                // Free text such as an e-mail address in a comment
                debug!(line, "Ignoring '@' outside an entry");
                pos = cursor;
                continue;
            }
        };

        let end = match find_block_end(bytes, cursor + 1, closer) {
            Some(end) => end,
            None => {
                result.failures.push(ParseFailure {
                    line,
                    message: format!("unterminated @{} entry", entry_type),
                });
                // Resume at the next '@' that starts a line
                match text[start + 1..].find("\n@") {
                    Some(idx) => {
                        pos = start + 1 + idx + 1;
                        continue;
                    }
                    None => break,
                }
            }
        };
        pos = end + 1;

        if matches!(entry_type.as_str(), "comment" | "preamble" | "string") {
            debug!(line, entry_type = %entry_type, "Skipping non-entry block");
            continue;
        }

        match parse_entry_body(&entry_type, &text[cursor + 1..end]) {
            Ok(mut entry) => {
                entry.set_raw(&text[start..=end]);
                result.entries.push(entry);
            }
            Err(message) => result.failures.push(ParseFailure { line, message }),
        }
    }

    result
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// Index of the delimiter closing a block whose body starts at `pos`
///
/// In a `(`-delimited block a `)` inside a top-level quoted value does not
/// close the block.
fn find_block_end(bytes: &[u8], mut pos: usize, closer: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quote = false;
    while pos < bytes.len() {
        match bytes[pos] {
            b'{' => depth += 1,
            b'}' if depth > 0 => depth -= 1,
            b'"' if closer == b')' && depth == 0 => in_quote = !in_quote,
            c if c == closer && depth == 0 && !in_quote => return Some(pos),
            _ => {}
        }
        pos += 1;
    }
    None
}

fn parse_entry_body(entry_type: &str, body: &str) -> std::result::Result<Entry, String> {
    let (key, mut rest) = match body.find(',') {
        Some(idx) => (body[..idx].trim(), &body[idx + 1..]),
        None => (body.trim(), ""),
    };
    if key.is_empty() || key.contains('=') || key.contains(char::is_whitespace) {
        return Err("missing citation key".to_string());
    }

    let mut entry = Entry::new(entry_type, key);

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let eq = rest
            .find('=')
            .ok_or_else(|| format!("field without value in entry {}", key))?;
        let name = rest[..eq].trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(format!("malformed field name in entry {}", key));
        }

        let (value, consumed) = read_value(&rest[eq + 1..])
            .ok_or_else(|| format!("malformed value for field {} in entry {}", name, key))?;
        entry.set(name, value);
        rest = &rest[eq + 1 + consumed..];
    }

    Ok(entry)
}

/// Read one field value; returns the value and the bytes consumed
///
/// A single `{...}` or `"..."` part yields its inner text. Concatenations and
/// bare tokens are returned as trimmed source text.
fn read_value(input: &str) -> Option<(String, usize)> {
    let bytes = input.as_bytes();
    let value_start = skip_whitespace(bytes, 0);
    let mut pos = value_start;
    let mut parts = 0;
    let mut single_inner: Option<(usize, usize)>;

    loop {
        pos = skip_whitespace(bytes, pos);
        match bytes.get(pos) {
            Some(b'{') => {
                let end = find_block_end(bytes, pos + 1, b'}')?;
                single_inner = Some((pos + 1, end));
                pos = end + 1;
            }
            Some(b'"') => {
                let mut depth = 0usize;
                let mut end = pos + 1;
                loop {
                    match bytes.get(end) {
                        None => return None,
                        Some(b'{') => depth += 1,
                        Some(b'}') if depth > 0 => depth -= 1,
                        Some(b'"') if depth == 0 && bytes[end - 1] != b'\\' => break,
                        _ => {}
                    }
                    end += 1;
                }
                single_inner = Some((pos + 1, end));
                pos = end + 1;
            }
            Some(_) => {
                let start = pos;
                while pos < bytes.len() && !matches!(bytes[pos], b',' | b'#' | b'}') {
                    pos += 1;
                }
                if input[start..pos].trim().is_empty() {
                    return None;
                }
                single_inner = None;
            }
            None => return None,
        }
        parts += 1;

        pos = skip_whitespace(bytes, pos);
        if bytes.get(pos) == Some(&b'#') {
            pos += 1;
            continue;
        }
        break;
    }

    let value = match (parts, single_inner) {
        (1, Some((s, e))) => input[s..e].to_string(),
        _ => input[value_start..pos].trim().to_string(),
    };
    Some((value, pos))
}
