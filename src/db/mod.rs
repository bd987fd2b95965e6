//! Database lifecycle: extension registration, connection setup, health.

pub mod migrations;
pub mod schema;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Once;

static VEC_EXTENSION: Once = Once::new();

/// Make sqlite-vec available to every connection opened after this call.
///
/// The extension ships a C entry point that must be installed through
/// SQLite's auto-extension hook; the function-pointer cast is the
/// registration form its documentation prescribes. Idempotent.
pub fn register_vec_extension() {
    VEC_EXTENSION.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Open the database at `path`, creating it (and its parent directory) on
/// first use.
///
/// Applies the connection pragmas, builds the schema, probes FTS5, and runs
/// any pending migrations, then verifies integrity. Returns the connection
/// plus whether the lexical full-text index is active.
pub fn open_database(path: impl AsRef<Path>) -> Result<(Connection, bool)> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create data directory {}", dir.display()))?;
    }

    register_vec_extension();

    let conn = Connection::open(path)
        .with_context(|| format!("cannot open database {}", path.display()))?;

    // WAL keeps readers unblocked during writes; the busy timeout rides out
    // short lock contention instead of surfacing SQLITE_BUSY immediately.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", "5000")?;

    schema::init_schema(&conn).context("schema initialization failed")?;
    let fts_enabled = schema::init_fts(&conn);
    migrations::run_migrations(&conn).context("migration run failed")?;

    let verdict: String = conn.pragma_query_value(None, "quick_check", |row| row.get(0))?;
    if verdict != "ok" {
        bail!(
            "database {} failed its integrity check ({verdict}); \
             restore a backup or run `lore reset` to start over",
            path.display()
        );
    }

    tracing::info!(path = %path.display(), fts_enabled, "database open");
    Ok((conn, fts_enabled))
}

/// Snapshot of database health for the doctor command.
pub struct HealthReport {
    pub schema_version: u32,
    pub fts_enabled: bool,
    pub integrity_ok: bool,
    pub integrity_details: String,
    pub sqlite_vec_version: String,
    pub entry_count: i64,
    pub triple_count: i64,
    pub entity_count: i64,
    pub transaction_count: i64,
}

/// Gather everything the doctor command reports.
pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let integrity_details: String = conn
        .pragma_query_value(None, "integrity_check", |row| row.get(0))
        .context("integrity check did not run")?;

    let sqlite_vec_version: String = conn
        .query_row("SELECT vec_version()", [], |row| row.get(0))
        .context("sqlite-vec is not loaded")?;

    Ok(HealthReport {
        schema_version: migrations::schema_version(conn).context("schema version unreadable")?,
        fts_enabled: schema::fts_available(conn),
        integrity_ok: integrity_details == "ok",
        integrity_details,
        sqlite_vec_version,
        entry_count: table_count(conn, "entries"),
        triple_count: table_count(conn, "triples"),
        entity_count: table_count(conn, "entities"),
        transaction_count: table_count(conn, "transactions"),
    })
}

fn table_count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap_or(0)
}
