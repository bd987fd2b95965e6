//! Hybrid retrieval — lexical, semantic, and graph signals fused per entry.
//!
//! Each scorer fetches `limit × 3` candidates. Scores fuse as a weighted sum
//! (missing components are zero), ordering is score descending with id
//! ascending as the deterministic, cursor-safe tie-break. Cursors are an
//! opaque base64 encoding of the last-emitted entry id; stale or malformed
//! cursors silently restart from the first page.

pub mod graph;
pub mod lexical;
pub mod semantic;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

use crate::embedding::EmbeddingProvider;
use crate::error::LoreResult;
use crate::knowledge::entries;
use crate::knowledge::types::Entry;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 200;

/// Per-scorer fusion weights.
#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub lexical: f64,
    pub semantic: f64,
    pub graph: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            lexical: 0.3,
            semantic: 0.5,
            graph: 0.2,
        }
    }
}

/// A retrieval request.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub query: String,
    pub limit: usize,
    pub cursor: Option<String>,
    pub weights: Weights,
    /// Entries must carry all of these tags (applied before pagination).
    pub required_tags: Vec<String>,
}

impl RetrievalParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_LIMIT,
            cursor: None,
            weights: Weights::default(),
            required_tags: Vec::new(),
        }
    }
}

/// One hydrated result with its score breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredEntry {
    #[serde(flatten)]
    pub entry: Entry,
    pub score: f64,
    pub lexical_score: f64,
    pub semantic_score: f64,
    pub graph_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_hops: Option<u32>,
}

/// A page of results.
#[derive(Debug, Serialize)]
pub struct RetrievalResponse {
    pub items: Vec<ScoredEntry>,
    pub next_cursor: Option<String>,
    pub retrieval_ms: u64,
}

#[derive(Default, Clone, Copy)]
struct Components {
    lexical: f64,
    semantic: f64,
    graph: f64,
    hops: Option<u32>,
}

/// Run the full pipeline: score, fuse, order, paginate, hydrate.
pub fn retrieve(
    conn: &Connection,
    fts_enabled: bool,
    provider: Option<&dyn EmbeddingProvider>,
    params: &RetrievalParams,
) -> LoreResult<RetrievalResponse> {
    let start = Instant::now();
    let limit = params.limit.clamp(1, MAX_LIMIT);
    let depth = limit * 3;

    // 1. Lexical and semantic candidates
    let lexical = lexical::score(conn, fts_enabled, &params.query, depth)?;
    let semantic = semantic::score(conn, provider, &params.query, depth);

    // 2. Weight redistribution when the semantic collaborator is out
    let weights = match &semantic {
        Some(_) => params.weights,
        None => redistribute(params.weights),
    };

    // 3. Graph expansion seeded by the current candidates
    let mut seeds: Vec<String> = Vec::new();
    for (id, _) in lexical.iter().chain(semantic.iter().flatten()) {
        if !seeds.contains(id) {
            seeds.push(id.clone());
        }
    }
    let graph = graph::score(conn, &seeds, depth)?;

    // 4. Fuse into a per-id component map
    let mut fused: HashMap<String, Components> = HashMap::new();
    for (id, score) in &lexical {
        fused.entry(id.clone()).or_default().lexical = *score;
    }
    for (id, score) in semantic.iter().flatten() {
        fused.entry(id.clone()).or_default().semantic = *score;
    }
    for (id, score, hops) in &graph {
        let slot = fused.entry(id.clone()).or_default();
        slot.graph = *score;
        slot.hops = Some(*hops);
    }

    // 5. Hydrate candidates, dropping rows deleted since scoring, and apply
    //    the tag filter ahead of pagination so cursor pages stay disjoint
    let ids: Vec<&str> = fused.keys().map(|s| s.as_str()).collect();
    let mut rows = entries::fetch_by_ids(conn, &ids)?;
    if !params.required_tags.is_empty() {
        rows.retain(|_, entry| params.required_tags.iter().all(|t| entry.tags.contains(t)));
    }

    // 6. Deterministic ordering: total descending, id ascending
    let mut scored: Vec<(String, Components, f64)> = fused
        .into_iter()
        .filter(|(id, _)| rows.contains_key(id))
        .map(|(id, c)| {
            let total =
                c.lexical * weights.lexical + c.semantic * weights.semantic + c.graph * weights.graph;
            (id, c, total)
        })
        .collect();
    scored.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    // 7. Cursor: start after the last-emitted id when it is still present
    let offset = match params.cursor.as_deref().and_then(decode_cursor) {
        Some(cursor_id) => scored
            .iter()
            .position(|(id, _, _)| *id == cursor_id)
            .map(|pos| pos + 1)
            .unwrap_or(0),
        None => 0,
    };

    let page: Vec<&(String, Components, f64)> = scored.iter().skip(offset).take(limit).collect();
    let has_more = scored.len() > offset + page.len();
    let next_cursor = if has_more {
        page.last().map(|(id, _, _)| encode_cursor(id))
    } else {
        None
    };

    let items = page
        .into_iter()
        .filter_map(|(id, c, total)| {
            rows.get(id).cloned().map(|entry| ScoredEntry {
                entry,
                score: *total,
                lexical_score: c.lexical,
                semantic_score: c.semantic,
                graph_score: c.graph,
                graph_hops: c.hops,
            })
        })
        .collect();

    Ok(RetrievalResponse {
        items,
        next_cursor,
        retrieval_ms: start.elapsed().as_millis() as u64,
    })
}

/// Fold an unavailable semantic scorer's weight into the others: 60% to
/// lexical, 40% to graph.
fn redistribute(weights: Weights) -> Weights {
    Weights {
        lexical: weights.lexical + weights.semantic * 0.6,
        semantic: 0.0,
        graph: weights.graph + weights.semantic * 0.4,
    }
}

/// Encode an entry id as an opaque cursor.
pub fn encode_cursor(id: &str) -> String {
    BASE64.encode(id)
}

/// Decode and shape-check a cursor. Anything malformed reads as `None`, which
/// the pipeline treats as "start of results".
pub fn decode_cursor(cursor: &str) -> Option<String> {
    let bytes = BASE64.decode(cursor).ok()?;
    let id = String::from_utf8(bytes).ok()?;
    if id.is_empty() || id.len() > 64 || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hash::HashEmbeddingProvider;
    use crate::knowledge::entries::NewEntry;
    use crate::knowledge::policy;
    use crate::knowledge::triples::{self, NewTriple};

    fn test_db() -> Connection {
        crate::db::register_vec_extension();
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        assert!(crate::db::schema::init_fts(&conn));
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
    fn cursor_round_trips_and_rejects_garbage() {
        let id = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
        assert_eq!(decode_cursor(&encode_cursor(id)).as_deref(), Some(id));

        assert!(decode_cursor("!!!not-base64!!!").is_none());
        assert!(decode_cursor(&BASE64.encode("has spaces")).is_none());
        assert!(decode_cursor(&BASE64.encode("")).is_none());
    }

    #[test]
    fn retrieves_lexical_match_without_provider() {
        let mut conn = test_db();
        let id = store(&mut conn, "ts-quirk", "Zod v4 changes", &["typescript"]);
        store(&mut conn, "unrelated", "nothing to see", &[]);

        let response = retrieve(&conn, true, None, &RetrievalParams::new("ts")).unwrap();
        assert!(!response.items.is_empty());
        assert_eq!(response.items[0].entry.id, id);
        assert!(response.items[0].lexical_score > 0.0);
        assert_eq!(response.items[0].semantic_score, 0.0);
    }

    #[test]
    fn redistribution_keeps_total_weight() {
        let folded = redistribute(Weights::default());
        assert!((folded.lexical - 0.6).abs() < 1e-9);
        assert_eq!(folded.semantic, 0.0);
        assert!((folded.graph - 0.4).abs() < 1e-9);
        let total = folded.lexical + folded.semantic + folded.graph;
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn graph_neighbors_surface_without_matching_text() {
        let mut conn = test_db();
        store(&mut conn, "tokio", "async runtime worth knowing", &[]);
        let neighbor = store(&mut conn, "mio", "event loop underneath", &[]);
        triples::create_triple(
            &mut conn,
            &NewTriple {
                subject: "tokio".to_string(),
                predicate: "built_on".to_string(),
                object: "mio".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        let response = retrieve(&conn, true, None, &RetrievalParams::new("async runtime")).unwrap();
        let hit = response.items.iter().find(|i| i.entry.id == neighbor);
        let hit = hit.expect("neighbor should surface through the graph scorer");
        assert_eq!(hit.graph_hops, Some(1));
        assert!((hit.graph_score - 0.5).abs() < 1e-9);
        assert_eq!(hit.lexical_score, 0.0);
    }

    #[test]
    fn pages_are_disjoint_and_ordered() {
        let mut conn = test_db();
        for i in 0..7 {
            store(&mut conn, &format!("paging {i}"), "shared paging content", &[]);
        }

        let mut params = RetrievalParams::new("paging");
        params.limit = 3;

        let page1 = retrieve(&conn, true, None, &params).unwrap();
        assert_eq!(page1.items.len(), 3);
        let cursor = page1.next_cursor.clone().expect("more pages remain");

        params.cursor = Some(cursor);
        let page2 = retrieve(&conn, true, None, &params).unwrap();
        assert!(!page2.items.is_empty());

        let ids1: Vec<&str> = page1.items.iter().map(|i| i.entry.id.as_str()).collect();
        let ids2: Vec<&str> = page2.items.iter().map(|i| i.entry.id.as_str()).collect();
        assert!(ids1.iter().all(|id| !ids2.contains(id)));

        // same cursor, same page — stable under no mutation
        let page2_again = retrieve(&conn, true, None, &params).unwrap();
        let ids2_again: Vec<&str> =
            page2_again.items.iter().map(|i| i.entry.id.as_str()).collect();
        assert_eq!(ids2, ids2_again);
    }

    #[test]
    fn last_page_has_no_cursor() {
        let mut conn = test_db();
        store(&mut conn, "single", "only one result", &[]);

        let response = retrieve(&conn, true, None, &RetrievalParams::new("single")).unwrap();
        assert_eq!(response.items.len(), 1);
        assert!(response.next_cursor.is_none());
    }

    #[test]
    fn invalid_cursor_degrades_to_first_page() {
        let mut conn = test_db();
        store(&mut conn, "cursors", "about cursors", &[]);

        let mut params = RetrievalParams::new("cursors");
        params.cursor = Some("@@definitely-not-a-cursor@@".to_string());
        let response = retrieve(&conn, true, None, &params).unwrap();
        assert_eq!(response.items.len(), 1);
    }

    #[test]
    fn required_tags_filter_before_pagination() {
        let mut conn = test_db();
        store(&mut conn, "tagged fact", "tagging content", &["keep"]);
        store(&mut conn, "untagged fact", "tagging content", &[]);

        let mut params = RetrievalParams::new("tagging");
        params.required_tags = vec!["keep".to_string()];
        let response = retrieve(&conn, true, None, &params).unwrap();
        assert_eq!(response.items.len(), 1);
        assert_eq!(response.items[0].entry.topic, "tagged fact");
    }

    #[test]
    fn semantic_component_contributes_with_provider() {
        let mut conn = test_db();
        use crate::embedding::EmbeddingProvider;
        let provider = HashEmbeddingProvider::new();

        let embedding = provider.embed("distinctive semantic payload").unwrap();
        let id = entries::create_entry(
            &mut conn,
            &NewEntry {
                topic: "semantics".to_string(),
                content: "distinctive semantic payload".to_string(),
                ..Default::default()
            },
            Some(&embedding),
        )
        .unwrap()
        .id;

        let response = retrieve(
            &conn,
            true,
            Some(&provider),
            &RetrievalParams::new("distinctive semantic payload"),
        )
        .unwrap();
        let hit = response.items.iter().find(|i| i.entry.id == id).unwrap();
        assert!(hit.semantic_score > 0.9);
        assert!(hit.score > 0.0);
    }

    #[test]
    fn weight_overrides_change_ranking() {
        let mut conn = test_db();
        // lexical favorite: exact-ish text match
        let lex = store(&mut conn, "alpha beta", "alpha beta", &[]);
        // graph favorite: no text match, linked from the lexical hit
        let gr = store(&mut conn, "gamma", "no overlap here", &[]);
        triples::create_triple(
            &mut conn,
            &NewTriple {
                subject: "alpha beta".to_string(),
                predicate: "links".to_string(),
                object: "gamma".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        let mut params = RetrievalParams::new("alpha beta");
        params.weights = Weights {
            lexical: 0.0,
            semantic: 0.0,
            graph: 1.0,
        };
        let response = retrieve(&conn, true, None, &params).unwrap();
        let first = &response.items[0];
        assert_eq!(first.entry.id, gr, "graph-weighted ranking should lead");
        assert!(response.items.iter().any(|i| i.entry.id == lex));
    }

    #[test]
    fn response_reports_elapsed_time() {
        let mut conn = test_db();
        store(&mut conn, "timed", "content", &[]);
        let response = retrieve(&conn, true, None, &RetrievalParams::new("timed")).unwrap();
        // can be 0 on a fast machine; the field just has to exist and not panic
        let _ = response.retrieval_ms;
    }
}
