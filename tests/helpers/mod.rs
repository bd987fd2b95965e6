#![allow(dead_code)]

use lore::db;
use lore::knowledge::entries::{self, NewEntry};
use lore::knowledge::policy;
use lore::knowledge::triples::{self, NewTriple};
use lore::knowledge::types::{Entry, Triple};
use rusqlite::Connection;

/// Open a fresh in-memory database with schema, FTS index, and migrations
/// applied, and policy restored to defaults.
pub fn test_db() -> Connection {
    db::register_vec_extension();
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    db::schema::init_schema(&conn).unwrap();
    assert!(db::schema::init_fts(&conn), "bundled SQLite should carry FTS5");
    db::migrations::run_migrations(&conn).unwrap();
    policy::reset_defaults();
    conn
}

/// Store an entry with topic, content, and tags. Returns the full row.
pub fn store_entry(conn: &mut Connection, topic: &str, content: &str, tags: &[&str]) -> Entry {
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
}

/// Create a triple with no provenance. Returns the full row.
pub fn relate(conn: &mut Connection, subject: &str, predicate: &str, object: &str) -> Triple {
    triples::create_triple(
        conn,
        &NewTriple {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            ..Default::default()
        },
    )
    .unwrap()
}

/// A NewTriple literal for detection/resolution tests.
pub fn candidate(subject: &str, predicate: &str, object: &str) -> NewTriple {
    NewTriple {
        subject: subject.to_string(),
        predicate: predicate.to_string(),
        object: object.to_string(),
        ..Default::default()
    }
}
