//! Schema versioning.
//!
//! `schema_meta` carries a monotonically increasing version number;
//! [`run_migrations`] walks the [`MIGRATIONS`] table and applies every step
//! newer than the stored version, stamping the version after each one.
//! Steps are additive only — there is no down path.

use rusqlite::Connection;

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// (target version, step) pairs in ascending order. Version 1 is the freshly
/// initialized schema and needs no step.
const MIGRATIONS: &[(u32, Step)] = &[(2, add_subject_predicate_index)];

/// Highest version this binary knows how to produce.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Read the stored schema version.
pub fn schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let raw: String = conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| row.get(0),
    )?;
    Ok(raw.parse().unwrap_or(0))
}

/// Bring the database up to [`CURRENT_SCHEMA_VERSION`].
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let stored = schema_version(conn)?;
    for (version, step) in MIGRATIONS {
        if *version <= stored {
            continue;
        }
        tracing::info!(version = *version, "applying schema migration");
        step(conn)?;
        conn.execute(
            "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
            [version.to_string()],
        )?;
    }
    Ok(())
}

/// v2: composite index for the (subject, predicate) scans the conflict
/// detector and triple upsert run on every relate call.
fn add_subject_predicate_index(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_triples_subject_predicate ON triples(subject, predicate)",
        [],
    )?;
    Ok(())
}
