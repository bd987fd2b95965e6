//! Entry write and read paths.
//!
//! [`create_entry`] runs the full mutation pipeline inside one SQLite
//! transaction: policy gate, length validation, row insert, embedding upsert,
//! and the CREATE transaction row. Updates overlay fields (explicit null
//! clears, absent preserves) and deletes are soft — a `deleted_at` stamp plus
//! a DELETE transaction carrying the row snapshot.

use rusqlite::{params, Connection, OptionalExtension};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{LoreError, LoreResult};
use crate::ids;
use crate::knowledge::types::{EntityType, Entry, TxOp, ENTRY_COLUMNS};
use crate::knowledge::{double_option, escape_like, normalize_tags, tags_to_json};
use crate::knowledge::{policy, transactions};

pub const MAX_TOPIC_CHARS: usize = 1_000;
pub const MAX_CONTENT_CHARS: usize = 100_000;
pub const DEFAULT_QUERY_LIMIT: usize = 50;
pub const MAX_QUERY_LIMIT: usize = 200;

/// Input for a new entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEntry {
    pub topic: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub actor: Option<String>,
    pub confidence: Option<f64>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub canonical_entity_id: Option<String>,
}

/// Field-level overlay for updates.
///
/// Plain `Option` fields preserve the stored value when absent; the
/// double-option fields additionally distinguish an explicit null, which
/// clears the column.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct EntryPatch {
    pub topic: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub source: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub actor: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub confidence: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub valid_from: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub valid_to: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub canonical_entity_id: Option<Option<String>>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        self.topic.is_none()
            && self.content.is_none()
            && self.tags.is_none()
            && self.source.is_none()
            && self.actor.is_none()
            && self.confidence.is_none()
            && self.valid_from.is_none()
            && self.valid_to.is_none()
            && self.canonical_entity_id.is_none()
    }
}

/// Filters for the storage-level entry query.
#[derive(Debug, Clone, Default)]
pub struct EntryQuery {
    pub topic: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub limit: Option<usize>,
}

/// Full write path: policy gate → validate → insert → embedding → CREATE log.
pub fn create_entry(
    conn: &mut Connection,
    new: &NewEntry,
    embedding: Option<&[f32]>,
) -> LoreResult<Entry> {
    // 1. Policy gate before any I/O
    policy::check_policy("store", &policy_params(new))?;

    // 2. Shape validation
    validate_topic(&new.topic)?;
    validate_content(&new.content)?;
    validate_confidence(new.confidence)?;

    let now = ids::now();
    let entry = Entry {
        id: ids::new_id(),
        topic: new.topic.clone(),
        content: new.content.clone(),
        tags: normalize_tags(&new.tags),
        source: new.source.clone(),
        actor: new.actor.clone(),
        confidence: new.confidence,
        valid_from: new.valid_from.clone(),
        valid_to: new.valid_to.clone(),
        status: "active".to_string(),
        canonical_entity_id: new.canonical_entity_id.clone(),
        created_at: now.clone(),
        updated_at: now,
        deleted_at: None,
    };

    let tx = conn.transaction()?;

    // 3. Insert the row
    insert_row(&tx, &entry)?;

    // 4. Embedding sync when a provider supplied one
    if let Some(vector) = embedding {
        upsert_embedding(&tx, &entry.id, vector)?;
    }

    // 5. CREATE transaction in the same batch
    let after = serde_json::to_value(&entry)?;
    transactions::record(&tx, TxOp::Create, EntityType::Entry, &entry.id, None, Some(&after))?;

    tx.commit()?;
    Ok(entry)
}

/// Overlay update: explicit null clears, absent preserves.
pub fn update_entry(
    conn: &mut Connection,
    id: &str,
    patch: &EntryPatch,
    embedding: Option<&[f32]>,
) -> LoreResult<Entry> {
    if patch.is_empty() {
        return Err(LoreError::validation("update requires at least one field"));
    }

    // policy gate before any I/O, as in the create path
    policy::check_policy("update", &patch_params(patch))?;

    let old = get_active_entry(conn, id)?
        .ok_or_else(|| LoreError::not_found(format!("entry not found: {id}")))?;

    let mut updated = old.clone();
    if let Some(topic) = &patch.topic {
        validate_topic(topic)?;
        updated.topic = topic.clone();
    }
    if let Some(content) = &patch.content {
        validate_content(content)?;
        updated.content = content.clone();
    }
    if let Some(tags) = &patch.tags {
        updated.tags = normalize_tags(tags);
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
    if let Some(valid_from) = &patch.valid_from {
        updated.valid_from = valid_from.clone();
    }
    if let Some(valid_to) = &patch.valid_to {
        updated.valid_to = valid_to.clone();
    }
    if let Some(canonical) = &patch.canonical_entity_id {
        updated.canonical_entity_id = canonical.clone();
    }
    updated.updated_at = ids::now();

    let tx = conn.transaction()?;

    let before = serde_json::to_value(&old)?;
    let after = serde_json::to_value(&updated)?;
    transactions::record(&tx, TxOp::Update, EntityType::Entry, id, Some(&before), Some(&after))?;

    write_mutable_fields(&tx, &updated)?;

    // Refresh the vector only when the content actually changed
    if updated.content != old.content {
        if let Some(vector) = embedding {
            upsert_embedding(&tx, id, vector)?;
        }
    }

    tx.commit()?;
    Ok(updated)
}

/// Soft delete: DELETE transaction (snapshot in before) + deleted_at stamp.
pub fn delete_entry(conn: &mut Connection, id: &str) -> LoreResult<()> {
    let entry = get_active_entry(conn, id)?
        .ok_or_else(|| LoreError::not_found(format!("entry not found: {id}")))?;

    let tx = conn.transaction()?;

    let before = serde_json::to_value(&entry)?;
    transactions::record(&tx, TxOp::Delete, EntityType::Entry, id, Some(&before), None)?;

    tx.execute(
        "UPDATE entries SET deleted_at = ?1 WHERE id = ?2",
        params![ids::now(), id],
    )?;

    tx.commit()?;
    Ok(())
}

/// Fetch an entry that has not been soft-deleted.
pub fn get_active_entry(conn: &Connection, id: &str) -> LoreResult<Option<Entry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1 AND deleted_at IS NULL"),
            params![id],
            Entry::from_row,
        )
        .optional()?;
    Ok(entry)
}

/// Substring-filtered query, newest first.
///
/// User-supplied wildcard characters are escaped so they match literally.
/// Tags are a required-all post-filter because they live in a JSON column.
pub fn query_entries(conn: &Connection, query: &EntryQuery) -> LoreResult<Vec<Entry>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_QUERY_LIMIT)
        .clamp(1, MAX_QUERY_LIMIT);

    let mut sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE deleted_at IS NULL");
    let mut params_vec: Vec<String> = Vec::new();

    if let Some(topic) = query.topic.as_deref().filter(|t| !t.is_empty()) {
        params_vec.push(format!("%{}%", escape_like(topic)));
        sql.push_str(&format!(" AND topic LIKE ?{} ESCAPE '\\'", params_vec.len()));
    }
    if let Some(content) = query.content.as_deref().filter(|c| !c.is_empty()) {
        params_vec.push(format!("%{}%", escape_like(content)));
        sql.push_str(&format!(" AND content LIKE ?{} ESCAPE '\\'", params_vec.len()));
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

    let mut rows = stmt
        .query_map(bound.as_slice(), Entry::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(required) = query.tags.as_ref().filter(|t| !t.is_empty()) {
        rows.retain(|entry| required.iter().all(|tag| entry.tags.contains(tag)));
    }

    Ok(rows)
}

/// Batch-fetch active entries by id for hydration.
pub fn fetch_by_ids(conn: &Connection, ids: &[&str]) -> LoreResult<HashMap<String, Entry>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM entries WHERE deleted_at IS NULL AND id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let rows = stmt
        .query_map(params.as_slice(), Entry::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut map = HashMap::new();
    for row in rows {
        map.insert(row.id.clone(), row);
    }
    Ok(map)
}

/// Exact-content dedup probe used by ingestion.
pub fn find_by_exact_content(conn: &Connection, content: &str) -> LoreResult<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM entries WHERE content = ?1 AND deleted_at IS NULL LIMIT 1",
            params![content],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// One id-descending page for the entries read resource.
pub fn list_page(
    conn: &Connection,
    limit: usize,
    after_id: Option<&str>,
) -> LoreResult<(Vec<Entry>, Option<String>)> {
    let mut rows = match after_id {
        Some(cursor) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM entries WHERE deleted_at IS NULL AND id < ?1 \
                 ORDER BY id DESC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![cursor, (limit + 1) as i64], Entry::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM entries WHERE deleted_at IS NULL \
                 ORDER BY id DESC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map(params![(limit + 1) as i64], Entry::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };

    let next = if rows.len() > limit {
        rows.truncate(limit);
        rows.last().map(|e| e.id.clone())
    } else {
        None
    };
    Ok((rows, next))
}

/// Replace (or insert) the embedding vector for an entry.
pub(crate) fn upsert_embedding(conn: &Connection, id: &str, embedding: &[f32]) -> LoreResult<()> {
    conn.execute("DELETE FROM entries_vec WHERE id = ?1", params![id])?;
    conn.execute(
        "INSERT INTO entries_vec (id, embedding) VALUES (?1, ?2)",
        params![id, crate::embedding::embedding_to_bytes(embedding)],
    )?;
    Ok(())
}

pub(crate) fn insert_row(conn: &Connection, entry: &Entry) -> LoreResult<()> {
    conn.execute(
        "INSERT INTO entries (id, topic, content, tags, source, actor, confidence, \
         valid_from, valid_to, status, canonical_entity_id, created_at, updated_at, deleted_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            entry.id,
            entry.topic,
            entry.content,
            tags_to_json(&entry.tags),
            entry.source,
            entry.actor,
            entry.confidence,
            entry.valid_from,
            entry.valid_to,
            entry.status,
            entry.canonical_entity_id,
            entry.created_at,
            entry.updated_at,
            entry.deleted_at,
        ],
    )?;
    Ok(())
}

/// Overwrite all mutable columns from an [`Entry`] value. Shared with undo.
pub(crate) fn write_mutable_fields(conn: &Connection, entry: &Entry) -> LoreResult<()> {
    conn.execute(
        "UPDATE entries SET topic = ?1, content = ?2, tags = ?3, source = ?4, actor = ?5, \
         confidence = ?6, valid_from = ?7, valid_to = ?8, status = ?9, \
         canonical_entity_id = ?10, updated_at = ?11 WHERE id = ?12",
        params![
            entry.topic,
            entry.content,
            tags_to_json(&entry.tags),
            entry.source,
            entry.actor,
            entry.confidence,
            entry.valid_from,
            entry.valid_to,
            entry.status,
            entry.canonical_entity_id,
            entry.updated_at,
            entry.id,
        ],
    )?;
    Ok(())
}

fn validate_topic(topic: &str) -> LoreResult<()> {
    if topic.trim().is_empty() {
        return Err(LoreError::validation("topic must not be empty"));
    }
    if topic.chars().count() > MAX_TOPIC_CHARS {
        return Err(LoreError::validation(format!(
            "topic exceeds {MAX_TOPIC_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_content(content: &str) -> LoreResult<()> {
    if content.is_empty() {
        return Err(LoreError::validation("content must not be empty"));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(LoreError::validation(format!(
            "content exceeds {MAX_CONTENT_CHARS} characters"
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

/// Policy parameter view of a new entry: only fields the caller provided.
fn policy_params(new: &NewEntry) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert("topic".into(), new.topic.clone().into());
    map.insert("content".into(), new.content.clone().into());
    if !new.tags.is_empty() {
        map.insert("tags".into(), serde_json::json!(new.tags));
    }
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

/// Policy parameter view of a patch: fields present in the overlay.
fn patch_params(patch: &EntryPatch) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    if let Some(topic) = &patch.topic {
        map.insert("topic".into(), topic.clone().into());
    }
    if let Some(content) = &patch.content {
        map.insert("content".into(), content.clone().into());
    }
    if let Some(Some(confidence)) = patch.confidence {
        map.insert("confidence".into(), serde_json::json!(confidence));
    }
    serde_json::Value::Object(map)
}
