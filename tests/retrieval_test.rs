mod helpers;

use helpers::{relate, store_entry, test_db};
use lore::embedding::hash::HashEmbeddingProvider;
use lore::embedding::EmbeddingProvider;
use lore::knowledge::entries::{self, NewEntry};
use lore::retrieval::{self, RetrievalParams, Weights};

#[test]
fn pages_from_a_cursor_are_disjoint_from_the_previous_page() {
    let mut conn = test_db();
    for i in 0..9 {
        store_entry(&mut conn, &format!("cursor topic {i}"), "stable corpus text", &[]);
    }

    let mut params = RetrievalParams::new("cursor topic");
    params.limit = 4;

    let mut seen: Vec<String> = Vec::new();
    let mut cursor = None;
    loop {
        params.cursor = cursor;
        let page = retrieval::retrieve(&conn, true, None, &params).unwrap();
        for item in &page.items {
            assert!(
                !seen.contains(&item.entry.id),
                "page overlap at {}",
                item.entry.id
            );
            seen.push(item.entry.id.clone());
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(seen.len(), 9, "every row surfaced exactly once");
}

#[test]
fn semantic_weight_redistributes_without_a_provider() {
    let mut conn = test_db();
    store_entry(&mut conn, "redistribution", "weights fold into the others", &[]);

    let response =
        retrieval::retrieve(&conn, true, None, &RetrievalParams::new("redistribution")).unwrap();
    let hit = &response.items[0];

    // with defaults 0.3/0.5/0.2 and a perfect lexical match, the folded
    // lexical weight is 0.3 + 0.6 * 0.5 = 0.6
    assert!((hit.lexical_score - 1.0).abs() < 1e-9);
    assert_eq!(hit.semantic_score, 0.0);
    assert!((hit.score - 0.6).abs() < 1e-6);
}

#[test]
fn all_three_signals_fuse_for_one_entry() {
    let mut conn = test_db();
    let provider = HashEmbeddingProvider::new();

    let embedding = provider.embed("tokio runtime internals").unwrap();
    let target = entries::create_entry(
        &mut conn,
        &NewEntry {
            topic: "tokio".to_string(),
            content: "tokio runtime internals".to_string(),
            ..Default::default()
        },
        Some(&embedding),
    )
    .unwrap();

    // seed entry that links to the target through the graph
    let embedding = provider.embed("async rust ecosystem survey").unwrap();
    entries::create_entry(
        &mut conn,
        &NewEntry {
            topic: "async rust".to_string(),
            content: "async rust ecosystem survey mentions tokio runtime".to_string(),
            ..Default::default()
        },
        Some(&embedding),
    )
    .unwrap();
    relate(&mut conn, "async rust", "uses", "tokio");

    let response = retrieval::retrieve(
        &conn,
        true,
        Some(&provider),
        &RetrievalParams::new("tokio runtime"),
    )
    .unwrap();

    let hit = response
        .items
        .iter()
        .find(|i| i.entry.id == target.id)
        .expect("target entry in results");
    assert!(hit.lexical_score > 0.0);
    assert!(hit.semantic_score > 0.0);
    assert!(hit.score > 0.0);
}

#[test]
fn custom_weights_are_respected() {
    let mut conn = test_db();
    store_entry(&mut conn, "weighted", "weighted content", &[]);

    let mut params = RetrievalParams::new("weighted");
    params.weights = Weights {
        lexical: 1.0,
        semantic: 0.0,
        graph: 0.0,
    };
    let response = retrieval::retrieve(&conn, true, None, &params).unwrap();
    // semantic weight is zero, so redistribution changes nothing
    assert!((response.items[0].score - response.items[0].lexical_score).abs() < 1e-9);
}

#[test]
fn wildcard_query_text_matches_literally_in_fallback() {
    let mut conn = test_db();
    store_entry(&mut conn, "100% sure", "certainty itself", &[]);
    store_entry(&mut conn, "100x sure", "a different claim", &[]);

    // force the substring fallback (fts disabled flag)
    let response = retrieval::retrieve(&conn, false, None, &RetrievalParams::new("100%")).unwrap();
    assert_eq!(response.items.len(), 1);
    assert_eq!(response.items[0].entry.topic, "100% sure");
}
