//! The knowledge engine — typed facts, mutation pipeline, transactional undo.
//!
//! Writes go through [`entries`], [`triples`], and [`entities`]; every
//! mutation there records exactly one [`transactions`] row in the same SQLite
//! transaction, which is what makes [`undo`] possible. [`policy`] gates all
//! mutations and [`conflicts`] holds advisory triple contradictions until a
//! client resolves them. Type definitions live in [`types`].

pub mod conflicts;
pub mod entities;
pub mod entries;
pub mod policy;
pub mod transactions;
pub mod triples;
pub mod types;
pub mod undo;

use serde::{Deserialize, Deserializer};

/// Escape LIKE metacharacters so user-supplied filter text matches literally.
///
/// The escaped string must be used with `ESCAPE '\'` in the query.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Normalize a tag list to set semantics: trimmed, deduplicated, sorted.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Serialize tags for the JSON array column.
pub fn tags_to_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

/// Decode the JSON array column back into a tag list.
pub fn tags_from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Deserialize helper distinguishing an absent field from an explicit null.
///
/// Fields annotated `#[serde(default, deserialize_with = "double_option")]`
/// arrive as `None` when absent and `Some(None)` when the caller sent null.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}
