//! Header label normalization.
//!
//! Raw spreadsheet labels become lower-case snake_case identifiers. The
//! result is deterministic and idempotent: normalizing an already-normalized
//! name returns it unchanged.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Returned for null, blank, or all-punctuation labels
pub const UNKNOWN_COLUMN: &str = "unknown_column";

/// PostgreSQL truncates identifiers longer than this many bytes
pub const MAX_IDENTIFIER_BYTES: usize = 63;

static NON_WORD_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").expect("valid regex"));
static UNDERSCORE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").expect("valid regex"));

/// Normalize one raw header cell into an identifier-safe name
pub fn normalize_column_name(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return UNKNOWN_COLUMN.to_string();
    };

    let lowered = raw.trim().to_lowercase();
    let replaced = NON_WORD_RUN.replace_all(&lowered, "_");
    let collapsed = UNDERSCORE_RUN.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches('_');

    if trimmed.is_empty() {
        UNKNOWN_COLUMN.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Cut a normalized name to the identifier limit on a character boundary
pub fn fit_identifier(name: &str) -> String {
    if name.len() <= MAX_IDENTIFIER_BYTES {
        return name.to_string();
    }
    let mut end = MAX_IDENTIFIER_BYTES;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    let cut = name[..end].trim_end_matches('_');
    if cut.is_empty() {
        UNKNOWN_COLUMN.to_string()
    } else {
        cut.to_string()
    }
}

/// Normalize a full header row, ready to be used as table column names
pub fn normalize_header(labels: &[Option<String>]) -> Vec<String> {
    labels
        .iter()
        .map(|label| fit_identifier(&normalize_column_name(label.as_deref())))
        .collect()
}

/// Keep the first occurrence of each name; later duplicates are dropped.
///
/// Returns `(source_index, name)` pairs for the kept columns, in order.
pub fn dedup_first_occurrence(names: &[String]) -> Vec<(usize, String)> {
    let mut seen: HashSet<&str> = HashSet::new();
    names
        .iter()
        .enumerate()
        .filter(|(_, name)| seen.insert(name.as_str()))
        .map(|(idx, name)| (idx, name.clone()))
        .collect()
}
