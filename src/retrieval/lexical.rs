//! Lexical scorer — FTS5 BM25 with a tiered substring fallback.
//!
//! FTS5 rank is negative (more negative = better match), so page scores are
//! normalized against the best rank into [0, 1]. When the full-text index is
//! absent or a MATCH query fails, the fallback ranks active entries by tier:
//! exact topic 1.0, topic substring 0.8, content substring 0.5, tag substring
//! 0.3. User wildcard metacharacters match literally on both paths.

use rusqlite::{params, Connection};

use crate::error::LoreResult;
use crate::knowledge::escape_like;

/// Score up to `depth` candidates for a query. Returns (entry_id, score) with
/// scores in [0, 1], best first.
pub fn score(
    conn: &Connection,
    fts_enabled: bool,
    query: &str,
    depth: usize,
) -> LoreResult<Vec<(String, f64)>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    if fts_enabled {
        match fts_score(conn, query, depth) {
            Ok(results) => return Ok(results),
            Err(err) => {
                tracing::warn!(%err, "FTS query failed, falling back to substring ranking");
            }
        }
    }

    substring_score(conn, query, depth)
}

/// Sanitize a user query for FTS5 MATCH syntax.
///
/// Each whitespace-delimited token is wrapped in double quotes, with embedded
/// quotes escaped by doubling, so FTS5 treats every token as a literal term
/// (implicit AND) and the quoting always balances.
pub fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| format!("\"{}\"", word.replace('"', "\"\"")))
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" ")
}

fn fts_score(conn: &Connection, query: &str, depth: usize) -> rusqlite::Result<Vec<(String, f64)>> {
    let sanitized = sanitize_fts_query(query);
    if sanitized.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT id, rank FROM entries_fts WHERE entries_fts MATCH ?1 ORDER BY rank LIMIT ?2",
    )?;
    let ranked: Vec<(String, f64)> = stmt
        .query_map(params![sanitized, depth as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // normalize against the best (most negative) rank in the page
    let best = ranked.first().map(|(_, rank)| *rank).unwrap_or(0.0);
    let normalized = ranked
        .into_iter()
        .map(|(id, rank)| {
            let score = if best == 0.0 { 1.0 } else { (rank / best).clamp(0.0, 1.0) };
            (id, score)
        })
        .collect();
    Ok(normalized)
}

/// Tiered substring ranking over active entries.
fn substring_score(conn: &Connection, query: &str, depth: usize) -> LoreResult<Vec<(String, f64)>> {
    let needle = query.trim().to_lowercase();
    let pattern = format!("%{}%", escape_like(&needle));

    let mut stmt = conn.prepare(
        "SELECT id, topic, content, tags FROM entries \
         WHERE deleted_at IS NULL AND (lower(topic) LIKE ?1 ESCAPE '\\' \
            OR lower(content) LIKE ?1 ESCAPE '\\' \
            OR lower(tags) LIKE ?1 ESCAPE '\\') \
         ORDER BY created_at DESC, id DESC LIMIT ?2",
    )?;

    let rows: Vec<(String, String, String, String)> = stmt
        .query_map(params![pattern, depth as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut scored: Vec<(String, f64)> = rows
        .into_iter()
        .map(|(id, topic, content, tags)| {
            let topic_lower = topic.to_lowercase();
            let tier = if topic_lower == needle {
                1.0
            } else if topic_lower.contains(&needle) {
                0.8
            } else if content.to_lowercase().contains(&needle) {
                0.5
            } else if tags.to_lowercase().contains(&needle) {
                0.3
            } else {
                0.0
            };
            (id, tier)
        })
        .filter(|(_, tier)| *tier > 0.0)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(depth);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::entries::{self, NewEntry};
    use crate::knowledge::policy;

    fn test_db(fts: bool) -> Connection {
        crate::db::register_vec_extension();
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        if fts {
            assert!(crate::db::schema::init_fts(&conn));
        }
        policy::reset_defaults();
        conn
    }

    fn store(conn: &mut Connection, topic: &str, content: &str, tags: &[&str]) -> String {
        entries::create_entry(
            conn,
            &NewEntry {
                topic: topic.to_string(),
                content: content.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            },
            None,
        )
        .unwrap()
        .id
    }

    #[test]
    fn sanitize_quotes_every_token() {
        assert_eq!(sanitize_fts_query("hello world"), "\"hello\" \"world\"");
        assert_eq!(sanitize_fts_query("rust OR python"), "\"rust\" \"OR\" \"python\"");
        assert_eq!(sanitize_fts_query("  spaces  "), "\"spaces\"");
        assert_eq!(sanitize_fts_query(""), "");
    }

    #[test]
    fn sanitize_doubles_embedded_quotes() {
        assert_eq!(sanitize_fts_query("say \"hi\""), "\"say\" \"\"\"hi\"\"\"");
        // balanced: every output token has an even number of quotes
        let sanitized = sanitize_fts_query("a\"b \"\" c");
        assert_eq!(sanitized.matches('"').count() % 2, 0);
    }

    #[test]
    fn fts_scores_are_normalized_to_unit_range() {
        let mut conn = test_db(true);
        store(&mut conn, "quantum computing", "cold qubits operate at low temperature", &[]);
        store(&mut conn, "cooking", "quantum is mentioned once in this longer text about food", &[]);

        let results = score(&conn, true, "quantum", 30).unwrap();
        assert!(!results.is_empty());
        assert!((results[0].1 - 1.0).abs() < 1e-9);
        for (_, s) in &results {
            assert!((0.0..=1.0).contains(s));
        }
    }

    #[test]
    fn fts_operators_are_treated_literally() {
        let mut conn = test_db(true);
        store(&mut conn, "search", "rust and python", &[]);

        // unsanitized, `"rust OR` would be an FTS syntax error
        let results = score(&conn, true, "rust \"unclosed", 10).unwrap();
        // no panic, no error; the quote is matched literally (no hits)
        assert!(results.iter().all(|(_, s)| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn substring_fallback_uses_tiers() {
        let mut conn = test_db(false);
        let exact = store(&mut conn, "rust", "about the language", &[]);
        let topical = store(&mut conn, "rust tips", "misc", &[]);
        let content = store(&mut conn, "languages", "rust is one of them", &[]);
        let tagged = store(&mut conn, "systems", "low level", &["rust"]);

        let results = score(&conn, false, "rust", 30).unwrap();
        let get = |id: &str| results.iter().find(|(i, _)| i == id).map(|(_, s)| *s);

        assert_eq!(get(&exact), Some(1.0));
        assert_eq!(get(&topical), Some(0.8));
        assert_eq!(get(&content), Some(0.5));
        assert_eq!(get(&tagged), Some(0.3));
    }

    #[test]
    fn substring_fallback_escapes_wildcards() {
        let mut conn = test_db(false);
        store(&mut conn, "percent 50%", "has a percent sign", &[]);
        store(&mut conn, "percent 50x", "no percent sign", &[]);

        let results = score(&conn, false, "50%", 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn soft_deleted_entries_never_score() {
        let mut conn = test_db(false);
        let id = store(&mut conn, "ephemeral", "will vanish", &[]);
        entries::delete_entry(&mut conn, &id).unwrap();

        let results = score(&conn, false, "ephemeral", 10).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn empty_query_scores_nothing() {
        let conn = test_db(true);
        assert!(score(&conn, true, "   ", 10).unwrap().is_empty());
    }
}
