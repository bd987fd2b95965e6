mod helpers;

use helpers::{candidate, relate, test_db};
use lore::knowledge::conflicts::{self, ConflictCache, Resolution};
use lore::knowledge::triples::{self, TripleQuery};

#[test]
fn contradicting_relate_yields_conflict_and_reject_leaves_store_unchanged() {
    let mut conn = test_db();
    relate(&mut conn, "Rust", "creator", "Graydon Hoare");

    let incoming = lore::knowledge::triples::NewTriple {
        confidence: Some(0.5),
        ..candidate("Rust", "creator", "Someone Else")
    };
    let conflict = conflicts::detect_conflict(&conn, &incoming).unwrap().unwrap();
    assert_eq!(conflict.existing.object, "Graydon Hoare");
    assert_eq!(
        conflict.candidate_resolutions,
        vec![Resolution::Replace, Resolution::RetainBoth, Resolution::Reject]
    );

    // park it, resolve with reject, store unchanged
    let cache = ConflictCache::durable();
    cache.save(&conn, &conflict).unwrap();

    let loaded = cache.load(&conn, &conflict.conflict_id).unwrap().unwrap();
    let written = conflicts::apply_resolution(&mut conn, &loaded, Resolution::Reject).unwrap();
    assert!(written.is_none());
    cache.remove(&conn, &conflict.conflict_id).unwrap();

    let rows = triples::query_triples(&conn, &TripleQuery::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].object, "Graydon Hoare");

    // consumed exactly once
    assert!(cache.load(&conn, &conflict.conflict_id).unwrap().is_none());
}

#[test]
fn replace_overwrites_existing_object_and_provenance() {
    let mut conn = test_db();
    let existing = relate(&mut conn, "Earth", "shape", "sphere");

    let incoming = lore::knowledge::triples::NewTriple {
        source: Some("survey".to_string()),
        confidence: Some(0.95),
        ..candidate("Earth", "shape", "oblate spheroid")
    };
    let conflict = conflicts::detect_conflict(&conn, &incoming).unwrap().unwrap();
    let written = conflicts::apply_resolution(&mut conn, &conflict, Resolution::Replace)
        .unwrap()
        .unwrap();

    assert_eq!(written.id, existing.id, "replace updates in place");
    assert_eq!(written.object, "oblate spheroid");
    assert_eq!(written.source.as_deref(), Some("survey"));
    assert_eq!(written.confidence, Some(0.95));

    let rows = triples::query_triples(&conn, &TripleQuery::default()).unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn retain_both_keeps_contradicting_triples_side_by_side() {
    let mut conn = test_db();
    relate(&mut conn, "coin", "face", "heads");

    let incoming = candidate("coin", "face", "tails");
    let conflict = conflicts::detect_conflict(&conn, &incoming).unwrap().unwrap();
    conflicts::apply_resolution(&mut conn, &conflict, Resolution::RetainBoth)
        .unwrap()
        .unwrap();

    let rows = triples::query_triples(
        &conn,
        &TripleQuery {
            subject: Some("coin".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(rows.len(), 2);
}

#[test]
fn same_object_never_conflicts() {
    let mut conn = test_db();
    relate(&mut conn, "Rust", "creator", "Graydon Hoare");

    let again = candidate("Rust", "creator", "Graydon Hoare");
    assert!(conflicts::detect_conflict(&conn, &again).unwrap().is_none());
}
