//! Parameter definitions for the undo and history tools.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `undo` tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct UndoParams {
    /// How many of the most recent mutations to revert. Defaults to 1.
    #[schemars(description = "How many of the most recent mutations to revert. Defaults to 1.")]
    pub count: Option<usize>,
}

/// Parameters for the `history` tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HistoryParams {
    /// Maximum transactions to return (default 50, capped at 200).
    #[schemars(description = "Maximum transactions to return (default 50, capped at 200)")]
    pub limit: Option<usize>,

    /// Filter by entity type: "entry", "triple", "entity", or "alias".
    #[schemars(description = "Filter by entity type: 'entry', 'triple', 'entity', or 'alias'")]
    pub entity_type: Option<String>,
}
