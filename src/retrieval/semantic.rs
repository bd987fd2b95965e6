//! Semantic scorer — embedding provider + vector KNN.
//!
//! Needs both collaborators: an [`EmbeddingProvider`] for the query and the
//! `entries_vec` table for the lookup. When either is absent or either call
//! fails, the scorer yields `None` and the retriever redistributes its weight
//! (60% lexical / 40% graph) instead of failing the query.

use rusqlite::{params, Connection};

use crate::embedding::{embedding_to_bytes, EmbeddingProvider};

/// Score up to `depth` nearest neighbors for a query.
///
/// Returns `None` when the scorer is unavailable or failed; `Some` carries
/// (entry_id, similarity) pairs with similarity in [0, 1].
pub fn score(
    conn: &Connection,
    provider: Option<&dyn EmbeddingProvider>,
    query: &str,
    depth: usize,
) -> Option<Vec<(String, f64)>> {
    let provider = provider?;

    let embedding = match provider.embed(query) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%err, "query embedding failed, semantic scorer degrades to empty");
            return None;
        }
    };
    if embedding.iter().all(|x| *x == 0.0) {
        // nothing to match against; KNN on a zero vector is noise
        return Some(Vec::new());
    }

    match knn(conn, &embedding, depth) {
        Ok(results) => Some(results),
        Err(err) => {
            tracing::warn!(%err, "vector lookup failed, semantic scorer degrades to empty");
            None
        }
    }
}

fn knn(conn: &Connection, embedding: &[f32], depth: usize) -> rusqlite::Result<Vec<(String, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT id, distance FROM entries_vec WHERE embedding MATCH ?1 \
         ORDER BY distance LIMIT ?2",
    )?;
    let results = stmt
        .query_map(params![embedding_to_bytes(embedding), depth as i64], |row| {
            let id: String = row.get(0)?;
            let distance: f64 = row.get(1)?;
            Ok((id, l2_to_similarity(distance)))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(results)
}

/// Convert L2 distance between normalized vectors to cosine similarity:
/// `cos = 1 - d² / 2`, clamped into [0, 1].
fn l2_to_similarity(distance: f64) -> f64 {
    (1.0 - (distance * distance) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hash::HashEmbeddingProvider;
    use crate::knowledge::entries::{self, NewEntry};
    use crate::knowledge::policy;

    fn test_db() -> Connection {
        crate::db::register_vec_extension();
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        policy::reset_defaults();
        conn
    }

    fn store_embedded(
        conn: &mut Connection,
        provider: &HashEmbeddingProvider,
        topic: &str,
        content: &str,
    ) -> String {
        use crate::embedding::EmbeddingProvider;
        let embedding = provider.embed(content).unwrap();
        entries::create_entry(
            conn,
            &NewEntry {
                topic: topic.to_string(),
                content: content.to_string(),
                ..Default::default()
            },
            Some(&embedding),
        )
        .unwrap()
        .id
    }

    #[test]
    fn absent_provider_yields_none() {
        let conn = test_db();
        assert!(score(&conn, None, "anything", 10).is_none());
    }

    #[test]
    fn nearest_neighbor_ranks_shared_vocabulary_first() {
        let mut conn = test_db();
        let provider = HashEmbeddingProvider::new();
        let close = store_embedded(&mut conn, &provider, "rust", "rust memory safety model");
        let far = store_embedded(&mut conn, &provider, "baking", "banana bread recipe steps");

        let results = score(&conn, Some(&provider), "rust memory safety", 10).unwrap();
        assert_eq!(results[0].0, close);
        let get = |id: &str| results.iter().find(|(i, _)| i == id).map(|(_, s)| *s).unwrap();
        assert!(get(&close) > get(&far));
        for (_, s) in &results {
            assert!((0.0..=1.0).contains(s));
        }
    }

    #[test]
    fn identical_content_scores_near_one() {
        let mut conn = test_db();
        let provider = HashEmbeddingProvider::new();
        let id = store_embedded(&mut conn, &provider, "t", "exactly the same words");

        let results = score(&conn, Some(&provider), "exactly the same words", 10).unwrap();
        assert_eq!(results[0].0, id);
        assert!(results[0].1 > 0.999);
    }

    #[test]
    fn tokenless_query_yields_empty_not_none() {
        let mut conn = test_db();
        let provider = HashEmbeddingProvider::new();
        store_embedded(&mut conn, &provider, "t", "content");

        let results = score(&conn, Some(&provider), "!!! ???", 10);
        assert_eq!(results, Some(Vec::new()));
    }

    #[test]
    fn similarity_conversion_bounds() {
        assert!((l2_to_similarity(0.0) - 1.0).abs() < 1e-9);
        assert!((l2_to_similarity(std::f64::consts::SQRT_2) - 0.0).abs() < 1e-9);
        assert_eq!(l2_to_similarity(5.0), 0.0);
    }
}
