//! Parameter definition for the `query` tool (hybrid retrieval).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `query` tool.
///
/// Topic and content are joined into the retrieval query string; tags must
/// all be present on returned entries. Offset pagination is not supported —
/// pass the cursor from the previous page instead.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct QueryParams {
    /// Topic terms to search for.
    #[schemars(description = "Topic terms to search for")]
    pub topic: Option<String>,

    /// Content terms to search for.
    #[schemars(description = "Content terms to search for")]
    pub content: Option<String>,

    /// Entries must carry every one of these tags.
    #[schemars(description = "Entries must carry every one of these tags")]
    pub tags: Option<Vec<String>>,

    /// Maximum results per page (default 20, capped at 200).
    #[schemars(description = "Maximum results per page (default 20, capped at 200)")]
    pub limit: Option<usize>,

    /// Opaque cursor from the previous page's next_cursor.
    #[schemars(description = "Opaque cursor from the previous page's next_cursor")]
    pub cursor: Option<String>,

    /// Not supported; requests carrying it are rejected.
    #[schemars(description = "Not supported; requests carrying it are rejected")]
    pub offset: Option<u64>,
}
