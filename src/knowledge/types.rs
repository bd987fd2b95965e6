//! Core row type definitions.
//!
//! Defines [`Entry`], [`Triple`], [`CanonicalEntity`], [`EntityAlias`],
//! [`TransactionRow`], and [`IngestionTask`], matching the table schemas, plus
//! the [`TxOp`] and [`EntityType`] discriminants the transaction log stores.

use serde::{Deserialize, Serialize};

/// A free-text knowledge record, matching the `entries` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Lexicographically sortable primary key.
    pub id: String,
    pub topic: String,
    pub content: String,
    /// Tag set, stored as a JSON array column.
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub actor: Option<String>,
    /// Confidence in `[0.0, 1.0]`, or `None` when the caller made no claim.
    pub confidence: Option<f64>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub status: String,
    pub canonical_entity_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Non-null marks the row soft-deleted; all queries filter it out.
    pub deleted_at: Option<String>,
}

/// Column list matching [`Entry::from_row`]. Keep the two in sync.
pub const ENTRY_COLUMNS: &str = "id, topic, content, tags, source, actor, confidence, \
     valid_from, valid_to, status, canonical_entity_id, created_at, updated_at, deleted_at";

impl Entry {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let tags_raw: String = row.get(3)?;
        Ok(Entry {
            id: row.get(0)?,
            topic: row.get(1)?,
            content: row.get(2)?,
            tags: super::tags_from_json(&tags_raw),
            source: row.get(4)?,
            actor: row.get(5)?,
            confidence: row.get(6)?,
            valid_from: row.get(7)?,
            valid_to: row.get(8)?,
            status: row.get(9)?,
            canonical_entity_id: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            deleted_at: row.get(13)?,
        })
    }
}

/// A directed subject-predicate-object relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Triple {
    pub id: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub source: Option<String>,
    pub actor: Option<String>,
    pub confidence: Option<f64>,
    pub status: String,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

/// Column list matching [`Triple::from_row`].
pub const TRIPLE_COLUMNS: &str =
    "id, subject, predicate, object, source, actor, confidence, status, created_at, deleted_at";

impl Triple {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Triple {
            id: row.get(0)?,
            subject: row.get(1)?,
            predicate: row.get(2)?,
            object: row.get(3)?,
            source: row.get(4)?,
            actor: row.get(5)?,
            confidence: row.get(6)?,
            status: row.get(7)?,
            created_at: row.get(8)?,
            deleted_at: row.get(9)?,
        })
    }
}

/// A canonical named concept. Always owns at least one alias (its lowercased
/// name, created alongside it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

/// A normalized (lowercased) name mapping to one canonical entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityAlias {
    pub id: String,
    pub alias: String,
    pub canonical_entity_id: String,
    pub created_at: String,
}

/// One committed mutation, sufficient to replay or invert it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRow {
    pub id: String,
    /// Stored as text so unknown historical ops stay readable (undo treats
    /// them as no-ops).
    pub op: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before_snapshot: Option<serde_json::Value>,
    pub after_snapshot: Option<serde_json::Value>,
    pub reverted_by: Option<String>,
    pub created_at: String,
}

pub const TRANSACTION_COLUMNS: &str =
    "id, op, entity_type, entity_id, before_snapshot, after_snapshot, reverted_by, created_at";

impl TransactionRow {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let before_raw: Option<String> = row.get(4)?;
        let after_raw: Option<String> = row.get(5)?;
        Ok(TransactionRow {
            id: row.get(0)?,
            op: row.get(1)?,
            entity_type: row.get(2)?,
            entity_id: row.get(3)?,
            before_snapshot: before_raw.and_then(|s| serde_json::from_str(&s).ok()),
            after_snapshot: after_raw.and_then(|s| serde_json::from_str(&s).ok()),
            reverted_by: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

/// Transaction log operation discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxOp {
    Create,
    Update,
    Delete,
    Merge,
    Revert,
}

impl TxOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Merge => "MERGE",
            Self::Revert => "REVERT",
        }
    }
}

impl std::str::FromStr for TxOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "MERGE" => Ok(Self::Merge),
            "REVERT" => Ok(Self::Revert),
            _ => Err(format!("unknown transaction op: {s}")),
        }
    }
}

/// Which table a transaction row refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Entry,
    Triple,
    Entity,
    Alias,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Triple => "triple",
            Self::Entity => "entity",
            Self::Alias => "alias",
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(Self::Entry),
            "triple" => Ok(Self::Triple),
            "entity" => Ok(Self::Entity),
            "alias" => Ok(Self::Alias),
            _ => Err(format!("unknown entity type: {s}")),
        }
    }
}

/// Bulk ingestion task state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionTask {
    pub id: String,
    pub status: String,
    pub input_uri: Option<String>,
    pub total_items: i64,
    pub processed_items: i64,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub const INGESTION_TASK_COLUMNS: &str =
    "id, status, input_uri, total_items, processed_items, error, created_at, updated_at";

impl IngestionTask {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(IngestionTask {
            id: row.get(0)?,
            status: row.get(1)?,
            input_uri: row.get(2)?,
            total_items: row.get(3)?,
            processed_items: row.get(4)?,
            error: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}
