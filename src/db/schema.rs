//! SQL DDL for all Lore tables.
//!
//! Defines the `entries`, `triples`, `entities`, `entity_aliases`,
//! `transactions`, `ingestion_tasks`, `session_state`, and `schema_meta`
//! tables, plus the `entries_fts` (FTS5) and `entries_vec` (vec0) indices.
//! All DDL uses `IF NOT EXISTS` for idempotent initialization. The FTS5 index
//! is probed separately because not every embedded engine build carries it.

use rusqlite::Connection;

/// All schema DDL statements for Lore's core tables.
const SCHEMA_SQL: &str = r#"
-- Free-text knowledge records
CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY,
    topic TEXT NOT NULL,
    content TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    source TEXT,
    actor TEXT,
    confidence REAL CHECK(confidence IS NULL OR (confidence >= 0.0 AND confidence <= 1.0)),
    valid_from TEXT,
    valid_to TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    canonical_entity_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_entries_topic ON entries(topic);
CREATE INDEX IF NOT EXISTS idx_entries_created ON entries(created_at);
CREATE INDEX IF NOT EXISTS idx_entries_deleted ON entries(deleted_at);
CREATE INDEX IF NOT EXISTS idx_entries_entity ON entries(canonical_entity_id);

-- Subject-predicate-object relationships (textual, not foreign-keyed, so
-- entity merge can rewrite them and entities can be deleted without cascades)
CREATE TABLE IF NOT EXISTS triples (
    id TEXT PRIMARY KEY,
    subject TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object TEXT NOT NULL,
    source TEXT,
    actor TEXT,
    confidence REAL CHECK(confidence IS NULL OR (confidence >= 0.0 AND confidence <= 1.0)),
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_triples_subject ON triples(subject);
CREATE INDEX IF NOT EXISTS idx_triples_predicate ON triples(predicate);
CREATE INDEX IF NOT EXISTS idx_triples_object ON triples(object);
CREATE INDEX IF NOT EXISTS idx_triples_deleted ON triples(deleted_at);

-- Canonical named concepts
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Normalized name -> canonical entity mappings
CREATE TABLE IF NOT EXISTS entity_aliases (
    id TEXT PRIMARY KEY,
    alias TEXT NOT NULL,
    canonical_entity_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_aliases_alias ON entity_aliases(alias);
CREATE INDEX IF NOT EXISTS idx_aliases_entity ON entity_aliases(canonical_entity_id);

-- Append-only mutation log; reverted_by is the only mutable column
CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY,
    op TEXT NOT NULL CHECK(op IN ('CREATE','UPDATE','DELETE','MERGE','REVERT')),
    entity_type TEXT NOT NULL CHECK(entity_type IN ('entry','triple','entity','alias')),
    entity_id TEXT NOT NULL,
    before_snapshot TEXT,
    after_snapshot TEXT,
    reverted_by TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tx_created ON transactions(created_at);
CREATE INDEX IF NOT EXISTS idx_tx_entity ON transactions(entity_id);

-- Bulk ingestion bookkeeping
CREATE TABLE IF NOT EXISTS ingestion_tasks (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL CHECK(status IN ('pending','processing','completed','failed')),
    input_uri TEXT,
    total_items INTEGER NOT NULL DEFAULT 0,
    processed_items INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Durable per-session key/value store (conflict cache backend)
CREATE TABLE IF NOT EXISTS session_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    stored_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// FTS5 external-content index over entries, kept in sync by triggers.
/// Created separately so a missing FTS5 module degrades to substring search.
const FTS_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
    topic,
    content,
    tags,
    id UNINDEXED,
    content='entries',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS entries_fts_ai AFTER INSERT ON entries BEGIN
    INSERT INTO entries_fts(rowid, topic, content, tags, id)
    VALUES (new.rowid, new.topic, new.content, new.tags, new.id);
END;

CREATE TRIGGER IF NOT EXISTS entries_fts_ad AFTER DELETE ON entries BEGIN
    INSERT INTO entries_fts(entries_fts, rowid, topic, content, tags, id)
    VALUES ('delete', old.rowid, old.topic, old.content, old.tags, old.id);
END;

CREATE TRIGGER IF NOT EXISTS entries_fts_au AFTER UPDATE ON entries BEGIN
    INSERT INTO entries_fts(entries_fts, rowid, topic, content, tags, id)
    VALUES ('delete', old.rowid, old.topic, old.content, old.tags, old.id);
    INSERT INTO entries_fts(rowid, topic, content, tags, id)
    VALUES (new.rowid, new.topic, new.content, new.tags, new.id);
END;
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax).
const VEC_TABLE_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS entries_vec USING vec0(
    id TEXT PRIMARY KEY,
    embedding FLOAT[384]
);
"#;

/// Initialize all core tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(VEC_TABLE_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

/// Probe for FTS5 and create the lexical index if the engine supports it.
///
/// Returns `true` when the index (and its sync triggers) are in place.
pub fn init_fts(conn: &Connection) -> bool {
    match conn.execute_batch(FTS_SQL) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(%err, "FTS5 unavailable, lexical search falls back to substring ranking");
            false
        }
    }
}

/// Whether the lexical full-text index exists in this database.
pub fn fts_available(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'entries_fts'",
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
    .unwrap_or(false)
}
