//! Triple write and read paths.
//!
//! Triples reference entities by textual subject/object rather than foreign
//! key so entity merge can be expressed as a rewrite. Mutations mirror the
//! entry pipeline: policy gate, length validation, row write plus transaction
//! row in one atomic batch, soft delete via `deleted_at`.

use rusqlite::{params, Connection, OptionalExtension};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{LoreError, LoreResult};
use crate::ids;
use crate::knowledge::types::{EntityType, Triple, TxOp, TRIPLE_COLUMNS};
use crate::knowledge::{double_option, escape_like, policy, transactions};

pub const MAX_FIELD_CHARS: usize = 2_000;
pub const DEFAULT_QUERY_LIMIT: usize = 50;
pub const MAX_QUERY_LIMIT: usize = 200;

/// Input for a new triple.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub source: Option<String>,
    pub actor: Option<String>,
    pub confidence: Option<f64>,
}

/// Field-level overlay for triple updates. Subject is immutable; changing the
/// relationship's anchor means a new triple.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct TriplePatch {
    pub predicate: Option<String>,
    pub object: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub source: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub actor: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub confidence: Option<Option<f64>>,
}

impl TriplePatch {
    pub fn is_empty(&self) -> bool {
        self.predicate.is_none()
            && self.object.is_none()
            && self.source.is_none()
            && self.actor.is_none()
            && self.confidence.is_none()
    }
}

/// Filters for the triple query.
#[derive(Debug, Clone, Default)]
pub struct TripleQuery {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
    pub limit: Option<usize>,
}

/// Result of an upsert: the row plus whether it was newly created.
#[derive(Debug, Clone, Serialize)]
pub struct UpsertOutcome {
    pub triple: Triple,
    pub created: bool,
}

/// Create a triple: policy gate → validate → insert + CREATE log.
pub fn create_triple(conn: &mut Connection, new: &NewTriple) -> LoreResult<Triple> {
    policy::check_policy("relate", &policy_params(new))?;
    validate_fields(new)?;

    let triple = build_triple(new);

    let tx = conn.transaction()?;
    insert_row(&tx, &triple)?;
    let after = serde_json::to_value(&triple)?;
    transactions::record(&tx, TxOp::Create, EntityType::Triple, &triple.id, None, Some(&after))?;
    tx.commit()?;

    Ok(triple)
}

/// Overlay update on an active triple.
pub fn update_triple(conn: &mut Connection, id: &str, patch: &TriplePatch) -> LoreResult<Triple> {
    if patch.is_empty() {
        return Err(LoreError::validation("update requires at least one field"));
    }

    // policy gate before any I/O, as in the create path
    policy::check_policy("update_triple", &patch_params(patch))?;

    let old = get_active_triple(conn, id)?
        .ok_or_else(|| LoreError::not_found(format!("triple not found: {id}")))?;

    let mut updated = old.clone();
    if let Some(predicate) = &patch.predicate {
        validate_field("predicate", predicate)?;
        updated.predicate = predicate.clone();
    }
    if let Some(object) = &patch.object {
        validate_field("object", object)?;
        updated.object = object.clone();
    }
    if let Some(source) = &patch.source {
        updated.source = source.clone();
    }
    if let Some(actor) = &patch.actor {
        updated.actor = actor.clone();
    }
    if let Some(confidence) = &patch.confidence {
        validate_confidence(*confidence)?;
        updated.confidence = *confidence;
    }

    let tx = conn.transaction()?;
    let before = serde_json::to_value(&old)?;
    let after = serde_json::to_value(&updated)?;
    transactions::record(&tx, TxOp::Update, EntityType::Triple, id, Some(&before), Some(&after))?;
    write_mutable_fields(&tx, &updated)?;
    tx.commit()?;

    Ok(updated)
}

/// Soft delete with DELETE log.
pub fn delete_triple(conn: &mut Connection, id: &str) -> LoreResult<()> {
    let triple = get_active_triple(conn, id)?
        .ok_or_else(|| LoreError::not_found(format!("triple not found: {id}")))?;

    let tx = conn.transaction()?;
    let before = serde_json::to_value(&triple)?;
    transactions::record(&tx, TxOp::Delete, EntityType::Triple, id, Some(&before), None)?;
    tx.execute(
        "UPDATE triples SET deleted_at = ?1 WHERE id = ?2",
        params![ids::now(), id],
    )?;
    tx.commit()?;
    Ok(())
}

/// Atomically update the active (subject, predicate) triple's object and
/// provenance, or insert a new row when none exists.
pub fn upsert_triple(conn: &mut Connection, new: &NewTriple) -> LoreResult<UpsertOutcome> {
    policy::check_policy("relate", &policy_params(new))?;
    validate_fields(new)?;

    let tx = conn.transaction()?;

    let existing = tx
        .query_row(
            &format!(
                "SELECT {TRIPLE_COLUMNS} FROM triples \
                 WHERE subject = ?1 AND predicate = ?2 AND deleted_at IS NULL \
                 ORDER BY created_at DESC, id DESC LIMIT 1"
            ),
            params![new.subject, new.predicate],
            Triple::from_row,
        )
        .optional()?;

    let outcome = match existing {
        Some(old) => {
            let mut updated = old.clone();
            updated.object = new.object.clone();
            updated.source = new.source.clone();
            updated.actor = new.actor.clone();
            updated.confidence = new.confidence;

            let before = serde_json::to_value(&old)?;
            let after = serde_json::to_value(&updated)?;
            transactions::record(
                &tx,
                TxOp::Update,
                EntityType::Triple,
                &old.id,
                Some(&before),
                Some(&after),
            )?;
            write_mutable_fields(&tx, &updated)?;

            UpsertOutcome {
                triple: updated,
                created: false,
            }
        }
        None => {
            let triple = build_triple(new);
            insert_row(&tx, &triple)?;
            let after = serde_json::to_value(&triple)?;
            transactions::record(&tx, TxOp::Create, EntityType::Triple, &triple.id, None, Some(&after))?;

            UpsertOutcome {
                triple,
                created: true,
            }
        }
    };

    tx.commit()?;
    Ok(outcome)
}

/// Fetch a triple that has not been soft-deleted.
pub fn get_active_triple(conn: &Connection, id: &str) -> LoreResult<Option<Triple>> {
    let triple = conn
        .query_row(
            &format!("SELECT {TRIPLE_COLUMNS} FROM triples WHERE id = ?1 AND deleted_at IS NULL"),
            params![id],
            Triple::from_row,
        )
        .optional()?;
    Ok(triple)
}

/// All active triples sharing a (subject, predicate) scope. Used by the
/// conflict detector and the merge collector.
pub fn active_by_subject_predicate(
    conn: &Connection,
    subject: &str,
    predicate: &str,
) -> LoreResult<Vec<Triple>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRIPLE_COLUMNS} FROM triples \
         WHERE subject = ?1 AND predicate = ?2 AND deleted_at IS NULL \
         ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt
        .query_map(params![subject, predicate], Triple::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Substring-filtered query over active triples, newest first.
pub fn query_triples(conn: &Connection, query: &TripleQuery) -> LoreResult<Vec<Triple>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_QUERY_LIMIT)
        .clamp(1, MAX_QUERY_LIMIT);

    let mut sql = format!("SELECT {TRIPLE_COLUMNS} FROM triples WHERE deleted_at IS NULL");
    let mut params_vec: Vec<String> = Vec::new();

    for (column, value) in [
        ("subject", query.subject.as_deref()),
        ("predicate", query.predicate.as_deref()),
        ("object", query.object.as_deref()),
    ] {
        if let Some(filter) = value.filter(|v| !v.is_empty()) {
            params_vec.push(format!("%{}%", escape_like(filter)));
            sql.push_str(&format!(" AND {column} LIKE ?{} ESCAPE '\\'", params_vec.len()));
        }
    }

    sql.push_str(&format!(
        " ORDER BY created_at DESC, id DESC LIMIT ?{}",
        params_vec.len() + 1
    ));

    let mut stmt = conn.prepare(&sql)?;
    let mut bound: Vec<&dyn rusqlite::types::ToSql> = params_vec
        .iter()
        .map(|p| p as &dyn rusqlite::types::ToSql)
        .collect();
    let limit_param = limit as i64;
    bound.push(&limit_param);

    let rows = stmt
        .query_map(bound.as_slice(), Triple::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// One id-descending page for the triples read resource.
pub fn list_page(
    conn: &Connection,
    limit: usize,
    after_id: Option<&str>,
) -> LoreResult<(Vec<Triple>, Option<String>)> {
    let mut rows = match after_id {
        Some(cursor) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRIPLE_COLUMNS} FROM triples WHERE deleted_at IS NULL AND id < ?1 \
                 ORDER BY id DESC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![cursor, (limit + 1) as i64], Triple::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRIPLE_COLUMNS} FROM triples WHERE deleted_at IS NULL \
                 ORDER BY id DESC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map(params![(limit + 1) as i64], Triple::from_row)?
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

fn build_triple(new: &NewTriple) -> Triple {
    Triple {
        id: ids::new_id(),
        subject: new.subject.clone(),
        predicate: new.predicate.clone(),
        object: new.object.clone(),
        source: new.source.clone(),
        actor: new.actor.clone(),
        confidence: new.confidence,
        status: "active".to_string(),
        created_at: ids::now(),
        deleted_at: None,
    }
}

pub(crate) fn insert_row(conn: &Connection, triple: &Triple) -> LoreResult<()> {
    conn.execute(
        "INSERT INTO triples (id, subject, predicate, object, source, actor, confidence, \
         status, created_at, deleted_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            triple.id,
            triple.subject,
            triple.predicate,
            triple.object,
            triple.source,
            triple.actor,
            triple.confidence,
            triple.status,
            triple.created_at,
            triple.deleted_at,
        ],
    )?;
    Ok(())
}

/// Overwrite all mutable columns from a [`Triple`] value. Shared with undo.
pub(crate) fn write_mutable_fields(conn: &Connection, triple: &Triple) -> LoreResult<()> {
    conn.execute(
        "UPDATE triples SET subject = ?1, predicate = ?2, object = ?3, source = ?4, \
         actor = ?5, confidence = ?6, status = ?7 WHERE id = ?8",
        params![
            triple.subject,
            triple.predicate,
            triple.object,
            triple.source,
            triple.actor,
            triple.confidence,
            triple.status,
            triple.id,
        ],
    )?;
    Ok(())
}

fn validate_fields(new: &NewTriple) -> LoreResult<()> {
    validate_field("subject", &new.subject)?;
    validate_field("predicate", &new.predicate)?;
    validate_field("object", &new.object)?;
    validate_confidence(new.confidence)
}

fn validate_field(name: &str, value: &str) -> LoreResult<()> {
    if value.trim().is_empty() {
        return Err(LoreError::validation(format!("{name} must not be empty")));
    }
    if value.chars().count() > MAX_FIELD_CHARS {
        return Err(LoreError::validation(format!(
            "{name} exceeds {MAX_FIELD_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_confidence(confidence: Option<f64>) -> LoreResult<()> {
    if let Some(c) = confidence {
        if !(0.0..=1.0).contains(&c) {
            return Err(LoreError::validation("confidence must be between 0.0 and 1.0"));
        }
    }
    Ok(())
}

fn policy_params(new: &NewTriple) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert("subject".into(), new.subject.clone().into());
    map.insert("predicate".into(), new.predicate.clone().into());
    map.insert("object".into(), new.object.clone().into());
    if let Some(source) = &new.source {
        map.insert("source".into(), source.clone().into());
    }
    if let Some(actor) = &new.actor {
        map.insert("actor".into(), actor.clone().into());
    }
    if let Some(confidence) = new.confidence {
        map.insert("confidence".into(), serde_json::json!(confidence));
    }
    serde_json::Value::Object(map)
}

fn patch_params(patch: &TriplePatch) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    if let Some(predicate) = &patch.predicate {
        map.insert("predicate".into(), predicate.clone().into());
    }
    if let Some(object) = &patch.object {
        map.insert("object".into(), object.clone().into());
    }
    if let Some(Some(confidence)) = patch.confidence {
        map.insert("confidence".into(), serde_json::json!(confidence));
    }
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::policy;

    fn test_db() -> Connection {
        crate::db::register_vec_extension();
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        policy::reset_defaults();
        conn
    }

    fn new_triple(s: &str, p: &str, o: &str) -> NewTriple {
        NewTriple {
            subject: s.to_string(),
            predicate: p.to_string(),
            object: o.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn create_and_query_triple() {
        let mut conn = test_db();
        let triple = create_triple(&mut conn, &new_triple("Rust", "creator", "Graydon Hoare")).unwrap();

        let found = query_triples(
            &conn,
            &TripleQuery {
                subject: Some("Rust".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, triple.id);

        let log = transactions::history(&conn, 10, Some("triple")).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].op, "CREATE");
    }

    #[test]
    fn field_boundary_lengths() {
        let mut conn = test_db();

        let exactly = "s".repeat(MAX_FIELD_CHARS);
        assert!(create_triple(&mut conn, &new_triple(&exactly, "p", "o")).is_ok());

        let over = "s".repeat(MAX_FIELD_CHARS + 1);
        let err = create_triple(&mut conn, &new_triple(&over, "p", "o")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[test]
    fn upsert_updates_object_in_place() {
        let mut conn = test_db();

        let first = upsert_triple(&mut conn, &new_triple("JS", "typeof null", "object")).unwrap();
        assert!(first.created);

        let second = upsert_triple(&mut conn, &new_triple("JS", "typeof null", "bug")).unwrap();
        assert!(!second.created);
        assert_eq!(second.triple.id, first.triple.id);
        assert_eq!(second.triple.object, "bug");

        // one row, updated in place
        let found = active_by_subject_predicate(&conn, "JS", "typeof null").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].object, "bug");
    }

    #[test]
    fn soft_delete_hides_triple() {
        let mut conn = test_db();
        let triple = create_triple(&mut conn, &new_triple("a", "b", "c")).unwrap();

        delete_triple(&mut conn, &triple.id).unwrap();
        assert!(get_active_triple(&conn, &triple.id).unwrap().is_none());
        assert!(active_by_subject_predicate(&conn, "a", "b").unwrap().is_empty());

        let err = delete_triple(&mut conn, &triple.id).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn update_overlays_and_clears_on_null() {
        let mut conn = test_db();
        let triple = create_triple(
            &mut conn,
            &NewTriple {
                source: Some("docs".to_string()),
                ..new_triple("Rust", "creator", "Graydon Hoare")
            },
        )
        .unwrap();

        let patch = TriplePatch {
            object: Some("Graydon".to_string()),
            source: Some(None),
            ..Default::default()
        };
        let updated = update_triple(&mut conn, &triple.id, &patch).unwrap();
        assert_eq!(updated.object, "Graydon");
        assert_eq!(updated.predicate, "creator");
        assert!(updated.source.is_none());
    }

    #[test]
    fn query_wildcards_match_literally() {
        let mut conn = test_db();
        create_triple(&mut conn, &new_triple("pkg_name", "is", "x")).unwrap();
        create_triple(&mut conn, &new_triple("pkgXname", "is", "y")).unwrap();

        let found = query_triples(
            &conn,
            &TripleQuery {
                subject: Some("pkg_name".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].subject, "pkg_name");
    }

    #[test]
    fn relate_policy_requires_all_three_fields() {
        let mut conn = test_db();
        let err = create_triple(&mut conn, &new_triple("", "p", "o")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Policy);
    }
}
