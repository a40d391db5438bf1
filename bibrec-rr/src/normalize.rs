//! Title and author normalization
//!
//! `normalize_title` is the single key function shared by index construction
//! and input matching. Any other normalization of titles would silently break
//! offline matching.

/// Canonical matching key for a title
///
/// Every character outside `[A-Za-z0-9]` becomes a space, whitespace runs
/// collapse to one space, and the result is trimmed. Idempotent.
pub fn normalize_title(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Author list collapsed to a single line for display and comparison
///
/// Never used as an index key.
pub fn normalize_author(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
