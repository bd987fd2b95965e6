//! Parameter definitions for the entry mutation tools.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::knowledge::entries::EntryPatch;

/// Parameters for the `store` tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct StoreParams {
    /// Short subject line the entry is indexed under (max 1000 chars).
    #[schemars(description = "Short subject line the entry is indexed under (max 1000 chars)")]
    pub topic: String,

    /// Free-text body of the knowledge record (max 100,000 chars).
    #[schemars(description = "Free-text body of the knowledge record (max 100,000 chars)")]
    pub content: String,

    /// Tags attached to the entry; duplicates are collapsed.
    #[schemars(description = "Tags attached to the entry; duplicates are collapsed")]
    pub tags: Option<Vec<String>>,

    /// Where this knowledge came from (a document, a conversation, a URL).
    #[schemars(description = "Where this knowledge came from (a document, a conversation, a URL)")]
    pub source: Option<String>,

    /// Who asserted it (user, assistant, or an external system).
    #[schemars(description = "Who asserted it (user, assistant, or an external system)")]
    pub actor: Option<String>,

    /// Confidence in [0.0, 1.0]. Omit when no claim is made.
    #[schemars(description = "Confidence 0.0-1.0. Omit when no claim is made.")]
    pub confidence: Option<f64>,

    /// Start of the validity window (RFC 3339).
    #[schemars(description = "Start of the validity window (RFC 3339)")]
    pub valid_from: Option<String>,

    /// End of the validity window (RFC 3339).
    #[schemars(description = "End of the validity window (RFC 3339)")]
    pub valid_to: Option<String>,
}

/// Parameters for the `update` tool.
///
/// Absent fields preserve the stored value; sending an explicit null clears a
/// nullable field.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateParams {
    /// Id of the entry to update.
    #[schemars(description = "Id of the entry to update")]
    pub id: String,

    #[serde(flatten)]
    pub patch: EntryPatch,
}

/// Parameters for the `delete` tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DeleteParams {
    /// Id of the row to soft-delete.
    #[schemars(description = "Id of the row to soft-delete")]
    pub id: String,

    /// What the id refers to: "entry" or "triple".
    #[schemars(description = "What the id refers to: 'entry' or 'triple'")]
    pub entity_type: String,
}
