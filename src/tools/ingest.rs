//! Parameter definitions for the ingestion tools.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `ingest` tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IngestParams {
    /// Raw text to chunk into entries. Small inputs complete synchronously;
    /// larger inputs return a task id to poll with ingestion_status.
    #[schemars(
        description = "Raw text to chunk into entries. Small inputs complete synchronously; larger inputs return a task id to poll with ingestion_status."
    )]
    pub content: String,

    /// Source recorded on every created entry. Defaults to ingestion:<task_id>.
    #[schemars(description = "Source recorded on every created entry. Defaults to ingestion:<task_id>.")]
    pub source: Option<String>,
}

/// Parameters for the `ingestion_status` tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IngestionStatusParams {
    /// Task id returned by ingest.
    #[schemars(description = "Task id returned by ingest")]
    pub task_id: String,
}
