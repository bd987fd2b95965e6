//! The append-only transaction log.
//!
//! Every mutation in [`super::entries`], [`super::triples`], and
//! [`super::entities`] calls [`record`] inside the same SQLite transaction as
//! its row writes, so the log and the data can never disagree. Rows are never
//! mutated afterwards except for the `reverted_by` stamp the undo engine
//! applies.

use rusqlite::{params, Connection};

use crate::error::LoreResult;
use crate::ids;
use crate::knowledge::types::{EntityType, TransactionRow, TxOp, TRANSACTION_COLUMNS};

/// Append one transaction row. Returns the minted transaction id.
///
/// Callers pass the `Connection` of an open SQLite transaction so the log row
/// commits atomically with the mutation it describes.
pub fn record(
    conn: &Connection,
    op: TxOp,
    entity_type: EntityType,
    entity_id: &str,
    before: Option<&serde_json::Value>,
    after: Option<&serde_json::Value>,
) -> LoreResult<String> {
    let id = ids::new_id();
    conn.execute(
        "INSERT INTO transactions (id, op, entity_type, entity_id, before_snapshot, after_snapshot, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            op.as_str(),
            entity_type.as_str(),
            entity_id,
            before.map(|v| v.to_string()),
            after.map(|v| v.to_string()),
            ids::now(),
        ],
    )?;
    Ok(id)
}

/// Stamp a transaction as reverted by the given REVERT transaction.
pub fn stamp_reverted(conn: &Connection, tx_id: &str, revert_id: &str) -> LoreResult<()> {
    conn.execute(
        "UPDATE transactions SET reverted_by = ?1 WHERE id = ?2",
        params![revert_id, tx_id],
    )?;
    Ok(())
}

/// The `n` most recent transactions that undo may target: non-REVERT rows not
/// yet stamped, newest first with id as the deterministic tie-break.
pub fn undo_candidates(conn: &Connection, n: usize) -> LoreResult<Vec<TransactionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions \
         WHERE op != 'REVERT' AND reverted_by IS NULL \
         ORDER BY created_at DESC, id DESC LIMIT ?1"
    ))?;
    let rows = stmt
        .query_map(params![n as i64], TransactionRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Recent history, newest first, optionally filtered by entity type.
pub fn history(
    conn: &Connection,
    limit: usize,
    entity_type: Option<&str>,
) -> LoreResult<Vec<TransactionRow>> {
    let rows = match entity_type {
        Some(et) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE entity_type = ?1 \
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![et, limit as i64], TransactionRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions \
                 ORDER BY created_at DESC, id DESC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map(params![limit as i64], TransactionRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}

/// One id-descending page for the transactions read resource.
///
/// Returns the page and, when more rows remain, the id to encode as the next
/// cursor.
pub fn list_page(
    conn: &Connection,
    limit: usize,
    after_id: Option<&str>,
) -> LoreResult<(Vec<TransactionRow>, Option<String>)> {
    let mut rows = match after_id {
        Some(cursor) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id < ?1 \
                 ORDER BY id DESC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![cursor, (limit + 1) as i64], TransactionRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY id DESC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map(params![(limit + 1) as i64], TransactionRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };

    let next = if rows.len() > limit {
        rows.truncate(limit);
        rows.last().map(|t| t.id.clone())
    } else {
        None
    };
    Ok((rows, next))
}
