//! The undo engine.
//!
//! [`undo`] inverts the most recent non-reverted transactions, newest first.
//! Each inversion runs in its own SQLite transaction: the inverse mutation,
//! a REVERT row with swapped snapshots, and the reverted_by stamp commit
//! together. A transaction already stamped is never revisited, which makes
//! undo idempotent, and ops this binary does not recognize invert to a no-op
//! that still records the REVERT.

use rusqlite::{params, Connection};
use std::str::FromStr;

use crate::error::{LoreError, LoreResult};
use crate::ids;
use crate::knowledge::entities::MergeSnapshot;
use crate::knowledge::types::{
    CanonicalEntity, EntityAlias, EntityType, Entry, TransactionRow, Triple, TxOp,
};
use crate::knowledge::{entries, transactions, triples};

/// Revert the `count` most recent non-reverted transactions.
///
/// Returns the ids of the transactions that were inverted, newest first.
/// An empty log yields an empty list.
pub fn undo(conn: &mut Connection, count: usize) -> LoreResult<Vec<String>> {
    let candidates = transactions::undo_candidates(conn, count)?;

    let mut reverted = Vec::with_capacity(candidates.len());
    for row in candidates {
        invert_one(conn, &row)?;
        reverted.push(row.id);
    }
    Ok(reverted)
}

/// Invert a single transaction atomically.
fn invert_one(conn: &mut Connection, row: &TransactionRow) -> LoreResult<()> {
    let entity_type = EntityType::from_str(&row.entity_type)
        .map_err(|e| LoreError::internal(format!("unreadable transaction {}: {e}", row.id)))?;

    let tx = conn.transaction()?;

    match TxOp::from_str(&row.op) {
        Ok(TxOp::Create) => invert_create(&tx, entity_type, row)?,
        Ok(TxOp::Delete) => invert_delete(&tx, entity_type, row)?,
        Ok(TxOp::Update) => invert_update(&tx, entity_type, row)?,
        Ok(TxOp::Merge) => invert_merge(&tx, row)?,
        // REVERT rows are filtered out of the candidate set
        Ok(TxOp::Revert) => {}
        // unknown historical op: record the REVERT and touch nothing
        Err(_) => {}
    }

    let revert_id = transactions::record(
        &tx,
        TxOp::Revert,
        entity_type,
        &row.entity_id,
        row.after_snapshot.as_ref(),
        row.before_snapshot.as_ref(),
    )?;
    transactions::stamp_reverted(&tx, &row.id, &revert_id)?;

    tx.commit()?;
    Ok(())
}

/// CREATE inverse: soft-delete rows that support it, remove the rest.
///
/// Entities and aliases carry no deleted_at column; removing a created
/// entity also removes its aliases so no alias dangles.
fn invert_create(tx: &Connection, entity_type: EntityType, row: &TransactionRow) -> LoreResult<()> {
    match entity_type {
        EntityType::Entry => {
            tx.execute(
                "UPDATE entries SET deleted_at = ?1 WHERE id = ?2",
                params![ids::now(), row.entity_id],
            )?;
        }
        EntityType::Triple => {
            tx.execute(
                "UPDATE triples SET deleted_at = ?1 WHERE id = ?2",
                params![ids::now(), row.entity_id],
            )?;
        }
        EntityType::Entity => {
            tx.execute(
                "DELETE FROM entity_aliases WHERE canonical_entity_id = ?1",
                params![row.entity_id],
            )?;
            tx.execute("DELETE FROM entities WHERE id = ?1", params![row.entity_id])?;
        }
        EntityType::Alias => {
            tx.execute("DELETE FROM entity_aliases WHERE id = ?1", params![row.entity_id])?;
        }
    }
    Ok(())
}

/// DELETE inverse: clear deleted_at, or re-insert rows that were removed.
fn invert_delete(tx: &Connection, entity_type: EntityType, row: &TransactionRow) -> LoreResult<()> {
    match entity_type {
        EntityType::Entry => {
            tx.execute(
                "UPDATE entries SET deleted_at = NULL WHERE id = ?1",
                params![row.entity_id],
            )?;
        }
        EntityType::Triple => {
            tx.execute(
                "UPDATE triples SET deleted_at = NULL WHERE id = ?1",
                params![row.entity_id],
            )?;
        }
        EntityType::Entity => {
            let entity: CanonicalEntity = snapshot(row.before_snapshot.as_ref(), &row.id)?;
            tx.execute(
                "INSERT OR IGNORE INTO entities (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![entity.id, entity.name, entity.created_at],
            )?;
        }
        EntityType::Alias => {
            let alias: EntityAlias = snapshot(row.before_snapshot.as_ref(), &row.id)?;
            tx.execute(
                "INSERT OR IGNORE INTO entity_aliases (id, alias, canonical_entity_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![alias.id, alias.alias, alias.canonical_entity_id, alias.created_at],
            )?;
        }
    }
    Ok(())
}

/// UPDATE inverse: overwrite all mutable fields with the before snapshot,
/// restoring updated_at along with them.
fn invert_update(tx: &Connection, entity_type: EntityType, row: &TransactionRow) -> LoreResult<()> {
    match entity_type {
        EntityType::Entry => {
            let before: Entry = snapshot(row.before_snapshot.as_ref(), &row.id)?;
            entries::write_mutable_fields(tx, &before)?;
        }
        EntityType::Triple => {
            let before: Triple = snapshot(row.before_snapshot.as_ref(), &row.id)?;
            triples::write_mutable_fields(tx, &before)?;
        }
        // entities and aliases are never target of UPDATE transactions
        EntityType::Entity | EntityType::Alias => {}
    }
    Ok(())
}

/// MERGE inverse, replaying the recorded id lists step by step.
///
/// A bulk rewrite keyed on names would also move the kept entity's own
/// references; the snapshot's per-row ids are what make the reversal exact.
fn invert_merge(tx: &Connection, row: &TransactionRow) -> LoreResult<()> {
    let snap: MergeSnapshot = snapshot(row.before_snapshot.as_ref(), &row.id)?;

    // 1. Recreate the merged entity with its original created_at
    tx.execute(
        "INSERT OR IGNORE INTO entities (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![snap.merge_id, snap.merge_name, snap.merge_created_at],
    )?;

    // 2. Rewrite only the recorded triples back to the merged name
    {
        let mut stmt = tx.prepare("UPDATE triples SET subject = ?1 WHERE id = ?2")?;
        for id in &snap.subj_triple_ids {
            stmt.execute(params![snap.merge_name, id])?;
        }
        let mut stmt = tx.prepare("UPDATE triples SET object = ?1 WHERE id = ?2")?;
        for id in &snap.obj_triple_ids {
            stmt.execute(params![snap.merge_name, id])?;
        }
    }

    // 3. Reassign the recorded entries back
    {
        let mut stmt = tx.prepare("UPDATE entries SET canonical_entity_id = ?1 WHERE id = ?2")?;
        for id in &snap.merge_entry_ids {
            stmt.execute(params![snap.merge_id, id])?;
        }
    }

    // 4. Reassign the recorded aliases back
    {
        let mut stmt =
            tx.prepare("UPDATE entity_aliases SET canonical_entity_id = ?1 WHERE id = ?2")?;
        for id in &snap.merge_alias_ids {
            stmt.execute(params![snap.merge_id, id])?;
        }
    }

    // 5. Drop the alias the merge introduced for the merged name
    tx.execute(
        "DELETE FROM entity_aliases WHERE alias = ?1 AND canonical_entity_id = ?2",
        params![snap.merge_name.to_lowercase(), snap.keep_id],
    )?;

    Ok(())
}

fn snapshot<T: serde::de::DeserializeOwned>(
    value: Option<&serde_json::Value>,
    tx_id: &str,
) -> LoreResult<T> {
    let value = value
        .ok_or_else(|| LoreError::internal(format!("transaction {tx_id} is missing its snapshot")))?;
    serde_json::from_value(value.clone())
        .map_err(|err| LoreError::internal(format!("corrupt snapshot on transaction {tx_id}: {err}")))
}
