//! Canonical entities, aliases, resolution, and merge.
//!
//! Every entity owns at least one alias — the lowercased form of its name,
//! created in the same batch. Resolution runs an exact alias join first and
//! falls back to a substring pass; upserts use the exact pass only so fuzzy
//! near-misses never collide. Merge absorbs one entity into another by
//! rewriting textual references, and records the exact affected row ids so
//! undo can reverse it per row.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{LoreError, LoreResult};
use crate::ids;
use crate::knowledge::types::{CanonicalEntity, EntityAlias, EntityType, TxOp};
use crate::knowledge::{escape_like, transactions};

/// Result of an entity upsert.
#[derive(Debug, Clone, Serialize)]
pub struct UpsertEntityOutcome {
    pub entity: CanonicalEntity,
    pub created: bool,
}

/// Result of a merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub keep_id: String,
    pub merge_id: String,
    /// Distinct triples whose subject or object was rewritten.
    pub merged_count: usize,
}

/// The before-snapshot of a MERGE transaction: everything undo needs to
/// reverse each step per row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeSnapshot {
    pub keep_id: String,
    pub keep_name: String,
    pub merge_id: String,
    pub merge_name: String,
    pub merge_created_at: String,
    pub subj_triple_ids: Vec<String>,
    pub obj_triple_ids: Vec<String>,
    pub merge_entry_ids: Vec<String>,
    pub merge_alias_ids: Vec<String>,
}

/// Create a canonical entity with its lowercase auto-alias, logging CREATE.
pub fn create_entity(conn: &mut Connection, name: &str) -> LoreResult<CanonicalEntity> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LoreError::validation("entity name must not be empty"));
    }

    let now = ids::now();
    let entity = CanonicalEntity {
        id: ids::new_id(),
        name: name.to_string(),
        created_at: now.clone(),
    };

    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO entities (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![entity.id, entity.name, entity.created_at],
    )?;
    tx.execute(
        "INSERT INTO entity_aliases (id, alias, canonical_entity_id, created_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![ids::new_id(), name.to_lowercase(), entity.id, now],
    )?;

    let after = serde_json::to_value(&entity)?;
    transactions::record(&tx, TxOp::Create, EntityType::Entity, &entity.id, None, Some(&after))?;

    tx.commit()?;
    Ok(entity)
}

/// Add a lowercased alias for an existing entity, logging CREATE (alias).
pub fn add_alias(conn: &mut Connection, entity_id: &str, alias: &str) -> LoreResult<EntityAlias> {
    let alias = alias.trim().to_lowercase();
    if alias.is_empty() {
        return Err(LoreError::validation("alias must not be empty"));
    }

    if get_entity(conn, entity_id)?.is_none() {
        return Err(LoreError::not_found(format!("entity not found: {entity_id}")));
    }

    let row = EntityAlias {
        id: ids::new_id(),
        alias,
        canonical_entity_id: entity_id.to_string(),
        created_at: ids::now(),
    };

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO entity_aliases (id, alias, canonical_entity_id, created_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![row.id, row.alias, row.canonical_entity_id, row.created_at],
    )?;
    let after = serde_json::to_value(&row)?;
    transactions::record(&tx, TxOp::Create, EntityType::Alias, &row.id, None, Some(&after))?;
    tx.commit()?;

    Ok(row)
}

/// Exact alias resolution: lowercased name joined through the alias table.
pub fn resolve_exact(conn: &Connection, name: &str) -> LoreResult<Option<CanonicalEntity>> {
    let normalized = name.trim().to_lowercase();
    let entity = conn
        .query_row(
            "SELECT e.id, e.name, e.created_at FROM entity_aliases a \
             JOIN entities e ON e.id = a.canonical_entity_id \
             WHERE a.alias = ?1 ORDER BY a.created_at, a.id LIMIT 1",
            params![normalized],
            |row| {
                Ok(CanonicalEntity {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(entity)
}

/// Exact pass, then fuzzy substring fallback with wildcard escaping.
pub fn resolve(conn: &Connection, name: &str) -> LoreResult<Option<CanonicalEntity>> {
    if let Some(entity) = resolve_exact(conn, name)? {
        return Ok(Some(entity));
    }

    let normalized = name.trim().to_lowercase();
    if normalized.is_empty() {
        return Ok(None);
    }
    let pattern = format!("%{}%", escape_like(&normalized));
    let entity = conn
        .query_row(
            "SELECT e.id, e.name, e.created_at FROM entity_aliases a \
             JOIN entities e ON e.id = a.canonical_entity_id \
             WHERE a.alias LIKE ?1 ESCAPE '\\' ORDER BY a.created_at, a.id LIMIT 1",
            params![pattern],
            |row| {
                Ok(CanonicalEntity {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(entity)
}

/// Find by exact alias or create. Fuzzy matches never collide here.
pub fn upsert_entity(conn: &mut Connection, name: &str) -> LoreResult<UpsertEntityOutcome> {
    if let Some(entity) = resolve_exact(conn, name)? {
        return Ok(UpsertEntityOutcome {
            entity,
            created: false,
        });
    }
    let entity = create_entity(conn, name)?;
    Ok(UpsertEntityOutcome {
        entity,
        created: true,
    })
}

pub fn get_entity(conn: &Connection, id: &str) -> LoreResult<Option<CanonicalEntity>> {
    let entity = conn
        .query_row(
            "SELECT id, name, created_at FROM entities WHERE id = ?1",
            params![id],
            |row| {
                Ok(CanonicalEntity {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(entity)
}

/// Aliases owned by an entity, oldest first.
pub fn list_aliases(conn: &Connection, entity_id: &str) -> LoreResult<Vec<EntityAlias>> {
    let mut stmt = conn.prepare(
        "SELECT id, alias, canonical_entity_id, created_at FROM entity_aliases \
         WHERE canonical_entity_id = ?1 ORDER BY created_at, id",
    )?;
    let rows = stmt
        .query_map(params![entity_id], |row| {
            Ok(EntityAlias {
                id: row.get(0)?,
                alias: row.get(1)?,
                canonical_entity_id: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Absorb `merge_id` into `keep_id`, rewriting all references in one batch.
///
/// The MERGE transaction's before snapshot records the exact affected row
/// ids; a bulk reversal would also move the kept entity's own references, so
/// undo replays these lists per row.
pub fn merge_entities(
    conn: &mut Connection,
    keep_id: &str,
    merge_id: &str,
) -> LoreResult<MergeOutcome> {
    if keep_id == merge_id {
        return Err(LoreError::validation("cannot merge an entity with itself"));
    }

    let keep = get_entity(conn, keep_id)?
        .ok_or_else(|| LoreError::not_found(format!("entity not found: {keep_id}")))?;
    let merge = get_entity(conn, merge_id)?
        .ok_or_else(|| LoreError::not_found(format!("entity not found: {merge_id}")))?;

    let tx = conn.transaction()?;

    // 1. Collect affected row ids while the old references still exist
    let subj_triple_ids = collect_ids(
        &tx,
        "SELECT id FROM triples WHERE subject = ?1 AND deleted_at IS NULL",
        &merge.name,
    )?;
    let obj_triple_ids = collect_ids(
        &tx,
        "SELECT id FROM triples WHERE object = ?1 AND deleted_at IS NULL",
        &merge.name,
    )?;
    let merge_entry_ids = collect_ids(
        &tx,
        "SELECT id FROM entries WHERE canonical_entity_id = ?1",
        merge_id,
    )?;
    let merge_alias_ids = collect_ids(
        &tx,
        "SELECT id FROM entity_aliases WHERE canonical_entity_id = ?1",
        merge_id,
    )?;

    let merged_count = subj_triple_ids
        .iter()
        .chain(obj_triple_ids.iter())
        .collect::<BTreeSet<_>>()
        .len();

    // 2. MERGE transaction with the reversal snapshot
    let snapshot = MergeSnapshot {
        keep_id: keep.id.clone(),
        keep_name: keep.name.clone(),
        merge_id: merge.id.clone(),
        merge_name: merge.name.clone(),
        merge_created_at: merge.created_at.clone(),
        subj_triple_ids: subj_triple_ids.clone(),
        obj_triple_ids: obj_triple_ids.clone(),
        merge_entry_ids: merge_entry_ids.clone(),
        merge_alias_ids: merge_alias_ids.clone(),
    };
    let before = serde_json::to_value(&snapshot)?;
    let after = serde_json::json!({
        "keep_id": keep.id,
        "keep_name": keep.name,
        "merged_count": merged_count,
    });
    transactions::record(&tx, TxOp::Merge, EntityType::Entity, merge_id, Some(&before), Some(&after))?;

    // 3. Rewrite triple references from the merged name to the kept name
    {
        let mut stmt = tx.prepare("UPDATE triples SET subject = ?1 WHERE id = ?2")?;
        for id in &subj_triple_ids {
            stmt.execute(params![keep.name, id])?;
        }
        let mut stmt = tx.prepare("UPDATE triples SET object = ?1 WHERE id = ?2")?;
        for id in &obj_triple_ids {
            stmt.execute(params![keep.name, id])?;
        }
    }

    // 4. Reassign entries
    {
        let mut stmt =
            tx.prepare("UPDATE entries SET canonical_entity_id = ?1 WHERE id = ?2")?;
        for id in &merge_entry_ids {
            stmt.execute(params![keep.id, id])?;
        }
    }

    // 5. Reassign aliases
    {
        let mut stmt =
            tx.prepare("UPDATE entity_aliases SET canonical_entity_id = ?1 WHERE id = ?2")?;
        for id in &merge_alias_ids {
            stmt.execute(params![keep.id, id])?;
        }
    }

    // 6. The merged name itself now resolves to the kept entity
    tx.execute(
        "INSERT INTO entity_aliases (id, alias, canonical_entity_id, created_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![ids::new_id(), merge.name.to_lowercase(), keep.id, ids::now()],
    )?;

    // 7. Drop the merged entity row
    tx.execute("DELETE FROM entities WHERE id = ?1", params![merge_id])?;

    tx.commit()?;

    Ok(MergeOutcome {
        keep_id: keep.id,
        merge_id: merge.id,
        merged_count,
    })
}

fn collect_ids(conn: &Connection, sql: &str, param: &str) -> LoreResult<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(params![param], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::triples::{self, NewTriple};
    use crate::knowledge::{entries, policy};

    fn test_db() -> Connection {
        crate::db::register_vec_extension();
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        policy::reset_defaults();
        conn
    }

    fn triple(s: &str, p: &str, o: &str) -> NewTriple {
        NewTriple {
            subject: s.to_string(),
            predicate: p.to_string(),
            object: o.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn create_entity_auto_creates_lowercase_alias() {
        let mut conn = test_db();
        let entity = create_entity(&mut conn, "JavaScript").unwrap();

        let aliases = list_aliases(&conn, &entity.id).unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].alias, "javascript");

        let resolved = resolve_exact(&conn, "JAVASCRIPT").unwrap().unwrap();
        assert_eq!(resolved.id, entity.id);
    }

    #[test]
    fn add_alias_rejects_unknown_entity() {
        let mut conn = test_db();
        let err = add_alias(&mut conn, "01ARZ3NDEKTSV4RRFFQ69G5FAV", "js").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn resolve_falls_back_to_substring() {
        let mut conn = test_db();
        let entity = create_entity(&mut conn, "PostgreSQL").unwrap();

        // exact miss, fuzzy hit
        let resolved = resolve(&conn, "postgre").unwrap().unwrap();
        assert_eq!(resolved.id, entity.id);

        // exact-only resolution does not take the fuzzy path
        assert!(resolve_exact(&conn, "postgre").unwrap().is_none());
    }

    #[test]
    fn fuzzy_resolution_escapes_wildcards() {
        let mut conn = test_db();
        create_entity(&mut conn, "anything").unwrap();

        // '%' alone would match every alias if passed through unescaped
        assert!(resolve(&conn, "%").unwrap().is_none());
    }

    #[test]
    fn upsert_entity_is_exact_only() {
        let mut conn = test_db();
        let first = upsert_entity(&mut conn, "Kubernetes").unwrap();
        assert!(first.created);

        let again = upsert_entity(&mut conn, "kubernetes").unwrap();
        assert!(!again.created);
        assert_eq!(again.entity.id, first.entity.id);

        // a fuzzy near-miss creates a fresh entity instead of colliding
        let near = upsert_entity(&mut conn, "Kube").unwrap();
        assert!(near.created);
        assert_ne!(near.entity.id, first.entity.id);
    }

    #[test]
    fn merge_rejects_self() {
        let mut conn = test_db();
        let entity = create_entity(&mut conn, "Solo").unwrap();
        let err = merge_entities(&mut conn, &entity.id, &entity.id).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[test]
    fn merge_rewrites_references_and_counts_distinct_triples() {
        let mut conn = test_db();
        let keep = create_entity(&mut conn, "JavaScript").unwrap();
        let merge = create_entity(&mut conn, "JS").unwrap();

        triples::create_triple(&mut conn, &triple("JS", "has", "closures")).unwrap();
        triples::create_triple(&mut conn, &triple("closures", "in", "JS")).unwrap();
        let entry = entries::create_entry(
            &mut conn,
            &entries::NewEntry {
                topic: "js entry".to_string(),
                content: "about js".to_string(),
                canonical_entity_id: Some(merge.id.clone()),
                ..Default::default()
            },
            None,
        )
        .unwrap();

        let outcome = merge_entities(&mut conn, &keep.id, &merge.id).unwrap();
        assert_eq!(outcome.merged_count, 2);

        // triples now reference the kept name
        let subj = triples::query_triples(
            &conn,
            &triples::TripleQuery {
                subject: Some("JavaScript".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(subj.len(), 1);
        assert_eq!(subj[0].object, "closures");

        // entry reassigned
        let row = entries::get_active_entry(&conn, &entry.id).unwrap().unwrap();
        assert_eq!(row.canonical_entity_id.as_deref(), Some(keep.id.as_str()));

        // "JS" resolves to the kept entity; merged entity row is gone
        let resolved = resolve_exact(&conn, "js").unwrap().unwrap();
        assert_eq!(resolved.id, keep.id);
        assert!(get_entity(&conn, &merge.id).unwrap().is_none());

        // snapshot carries the affected ids
        let log = transactions::history(&conn, 20, Some("entity")).unwrap();
        let merge_tx = log.iter().find(|t| t.op == "MERGE").unwrap();
        let snapshot: MergeSnapshot =
            serde_json::from_value(merge_tx.before_snapshot.clone().unwrap()).unwrap();
        assert_eq!(snapshot.subj_triple_ids.len(), 1);
        assert_eq!(snapshot.obj_triple_ids.len(), 1);
        assert_eq!(snapshot.merge_entry_ids, vec![entry.id]);
        assert_eq!(snapshot.merge_alias_ids.len(), 1);
    }

    #[test]
    fn merge_missing_entity_is_not_found() {
        let mut conn = test_db();
        let keep = create_entity(&mut conn, "Keeper").unwrap();
        let err = merge_entities(&mut conn, &keep.id, "01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }
}
