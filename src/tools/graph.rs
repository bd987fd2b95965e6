//! Parameter definitions for the triple and conflict tools.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::knowledge::triples::TriplePatch;

/// Parameters for the `relate` tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RelateParams {
    /// Subject of the relationship (max 2000 chars).
    #[schemars(description = "Subject of the relationship (max 2000 chars)")]
    pub subject: String,

    /// Relationship label, e.g. "creator", "depends_on".
    #[schemars(description = "Relationship label, e.g. 'creator', 'depends_on'")]
    pub predicate: String,

    /// Object of the relationship (max 2000 chars).
    #[schemars(description = "Object of the relationship (max 2000 chars)")]
    pub object: String,

    /// Where this relationship was asserted.
    #[schemars(description = "Where this relationship was asserted")]
    pub source: Option<String>,

    /// Who asserted it.
    #[schemars(description = "Who asserted it")]
    pub actor: Option<String>,

    /// Confidence in [0.0, 1.0].
    #[schemars(description = "Confidence 0.0-1.0")]
    pub confidence: Option<f64>,
}

/// Parameters for the `query_graph` tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct QueryGraphParams {
    /// Substring filter on subjects.
    #[schemars(description = "Substring filter on subjects")]
    pub subject: Option<String>,

    /// Substring filter on predicates.
    #[schemars(description = "Substring filter on predicates")]
    pub predicate: Option<String>,

    /// Substring filter on objects.
    #[schemars(description = "Substring filter on objects")]
    pub object: Option<String>,

    /// Maximum results (default 50, capped at 200).
    #[schemars(description = "Maximum results (default 50, capped at 200)")]
    pub limit: Option<usize>,
}

/// Parameters for the `update_triple` tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateTripleParams {
    /// Id of the triple to update.
    #[schemars(description = "Id of the triple to update")]
    pub id: String,

    #[serde(flatten)]
    pub patch: TriplePatch,
}

/// Parameters for the `upsert_triple` tool. Shape matches `relate`; the
/// active (subject, predicate) row is updated in place when one exists.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct UpsertTripleParams {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub source: Option<String>,
    pub actor: Option<String>,
    pub confidence: Option<f64>,
}

/// Parameters for the `resolve_conflict` tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ResolveConflictParams {
    /// The conflict_id returned by a conflicting relate call.
    #[schemars(description = "The conflict_id returned by a conflicting relate call")]
    pub conflict_id: String,

    /// One of "replace", "retain_both", "reject".
    #[schemars(description = "One of 'replace', 'retain_both', 'reject'")]
    pub strategy: String,
}
