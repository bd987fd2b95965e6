//! Parameter definitions for the canonical-entity tools.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `upsert_entity` tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct UpsertEntityParams {
    /// Canonical name; resolution matches its lowercased form exactly.
    #[schemars(description = "Canonical name; resolution matches its lowercased form exactly")]
    pub name: String,
}

/// Parameters for the `merge_entities` tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MergeEntitiesParams {
    /// Entity that survives the merge.
    #[schemars(description = "Entity that survives the merge")]
    pub keep_id: String,

    /// Entity absorbed into keep_id; its references are rewritten.
    #[schemars(description = "Entity absorbed into keep_id; its references are rewritten")]
    pub merge_id: String,
}
