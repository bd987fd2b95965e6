//! Graph scorer — single-hop neighborhood expansion.
//!
//! Takes the topics of the current lexical/semantic candidates as seeds,
//! walks active triples whose subject or object equals a seed topic, collects
//! the terms on the opposite side, and surfaces entries whose topic equals a
//! collected term and that are not already seeds. One hop only, scored
//! 1 / (1 + hops).

use rusqlite::{params, Connection};
use std::collections::{BTreeSet, HashSet};

use crate::error::LoreResult;

/// Hop count of the expansion this scorer performs.
pub const HOPS: u32 = 1;

/// Score graph neighbors of the seed entries.
///
/// Returns (entry_id, score, hops) for entries one hop away from any seed.
pub fn score(
    conn: &Connection,
    seed_ids: &[String],
    depth: usize,
) -> LoreResult<Vec<(String, f64, u32)>> {
    if seed_ids.is_empty() {
        return Ok(Vec::new());
    }

    // topics of the current candidates
    let seed_topics = topics_of(conn, seed_ids)?;
    if seed_topics.is_empty() {
        return Ok(Vec::new());
    }

    // terms one hop across any active triple
    let mut neighbor_terms: BTreeSet<String> = BTreeSet::new();
    {
        let mut stmt = conn.prepare(
            "SELECT subject, object FROM triples \
             WHERE deleted_at IS NULL AND (subject = ?1 OR object = ?1)",
        )?;
        for topic in &seed_topics {
            let pairs = stmt
                .query_map(params![topic], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (subject, object) in pairs {
                let opposite = if &subject == topic { object } else { subject };
                neighbor_terms.insert(opposite);
            }
        }
    }
    neighbor_terms.retain(|term| !seed_topics.contains(term));
    if neighbor_terms.is_empty() {
        return Ok(Vec::new());
    }

    // entries whose topic equals a collected term, excluding the seeds
    let seed_set: HashSet<&str> = seed_ids.iter().map(|s| s.as_str()).collect();
    let hop_score = 1.0 / (1.0 + f64::from(HOPS));
    let mut results = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT id FROM entries WHERE deleted_at IS NULL AND topic = ?1",
        )?;
        for term in &neighbor_terms {
            let ids = stmt
                .query_map(params![term], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            for id in ids {
                if !seed_set.contains(id.as_str()) {
                    results.push((id, hop_score, HOPS));
                }
            }
            if results.len() >= depth {
                break;
            }
        }
    }
    results.truncate(depth);
    Ok(results)
}

fn topics_of(conn: &Connection, ids: &[String]) -> LoreResult<BTreeSet<String>> {
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT DISTINCT topic FROM entries WHERE deleted_at IS NULL AND id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
    let topics = stmt
        .query_map(params.as_slice(), |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(topics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::entries::{self, NewEntry};
    use crate::knowledge::policy;
    use crate::knowledge::triples::{self, NewTriple};

    fn test_db() -> Connection {
        crate::db::register_vec_extension();
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        policy::reset_defaults();
        conn
    }

    fn store(conn: &mut Connection, topic: &str, content: &str) -> String {
        entries::create_entry(
            conn,
            &NewEntry {
                topic: topic.to_string(),
                content: content.to_string(),
                ..Default::default()
            },
            None,
        )
        .unwrap()
        .id
    }

    fn relate(conn: &mut Connection, s: &str, p: &str, o: &str) {
        triples::create_triple(
            conn,
            &NewTriple {
                subject: s.to_string(),
                predicate: p.to_string(),
                object: o.to_string(),
                ..Default::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn finds_entries_one_hop_away() {
        let mut conn = test_db();
        let seed = store(&mut conn, "tokio", "async runtime for rust");
        let neighbor = store(&mut conn, "rust", "the language itself");
        relate(&mut conn, "tokio", "written_in", "rust");

        let results = score(&conn, &[seed], 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, neighbor);
        assert!((results[0].1 - 0.5).abs() < 1e-9);
        assert_eq!(results[0].2, 1);
    }

    #[test]
    fn walks_both_triple_directions() {
        let mut conn = test_db();
        let seed = store(&mut conn, "closures", "captured environments");
        let neighbor = store(&mut conn, "JS", "the other language");
        // seed topic appears as the object here
        relate(&mut conn, "JS", "has", "closures");

        let results = score(&conn, &[seed], 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, neighbor);
    }

    #[test]
    fn seeds_are_never_their_own_neighbors() {
        let mut conn = test_db();
        let a = store(&mut conn, "rust", "language");
        let b = store(&mut conn, "tokio", "runtime");
        relate(&mut conn, "tokio", "written_in", "rust");

        let results = score(&conn, &[a.clone(), b.clone()], 10).unwrap();
        assert!(results.is_empty(), "both endpoints are already seeds");
    }

    #[test]
    fn deleted_triples_and_entries_are_invisible() {
        let mut conn = test_db();
        let seed = store(&mut conn, "tokio", "runtime");
        let neighbor = store(&mut conn, "rust", "language");
        let triple = triples::create_triple(
            &mut conn,
            &NewTriple {
                subject: "tokio".to_string(),
                predicate: "written_in".to_string(),
                object: "rust".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        triples::delete_triple(&mut conn, &triple.id).unwrap();
        assert!(score(&conn, &[seed.clone()], 10).unwrap().is_empty());

        // restore the edge but delete the neighbor entry
        triples::create_triple(
            &mut conn,
            &NewTriple {
                subject: "tokio".to_string(),
                predicate: "written_in".to_string(),
                object: "rust".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        entries::delete_entry(&mut conn, &neighbor).unwrap();
        assert!(score(&conn, &[seed], 10).unwrap().is_empty());
    }

    #[test]
    fn empty_seeds_scores_nothing() {
        let conn = test_db();
        assert!(score(&conn, &[], 10).unwrap().is_empty());
    }
}
