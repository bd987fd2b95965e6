//! The MCP tool surface.
//!
//! [`LoreTools`] holds the shared state (serialized db connection, optional
//! embedding provider, conflict cache, change listener) and exposes every
//! operation via the `#[tool_router]` macro. Tool bodies validate input,
//! run the blocking core under `spawn_blocking`, notify the change listener
//! on committed mutations, and wrap results in the structured envelope:
//! success carries a short human text plus a `lore://` resource blob, errors
//! serialize `{error, message, retryable}`.

pub mod entity;
pub mod graph;
pub mod history;
pub mod ingest;
pub mod query;
pub mod store;

use rmcp::handler::server::tool::{Parameters, ToolRouter};
use rmcp::model::{
    AnnotateAble, ListResourcesResult, PaginatedRequestParam, RawResource,
    ReadResourceRequestParam, ReadResourceResult, ResourceContents,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{tool, tool_handler, tool_router, ErrorData, ServerHandler};
use rusqlite::Connection;
use serde::Serialize;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::config::LoreConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{LoreError, LoreResult};
use crate::ingest as ingestion;
use crate::knowledge::conflicts::{ConflictCache, Resolution};
use crate::knowledge::entries::{self, NewEntry};
use crate::knowledge::triples::{self, NewTriple, TripleQuery};
use crate::knowledge::{conflicts, entities, transactions, undo};
use crate::notify::ChangeListener;
use crate::retrieval::{self, RetrievalParams, Weights};

use entity::{MergeEntitiesParams, UpsertEntityParams};
use graph::{
    QueryGraphParams, RelateParams, ResolveConflictParams, UpdateTripleParams, UpsertTripleParams,
};
use history::{HistoryParams, UndoParams};
use ingest::{IngestParams, IngestionStatusParams};
use query::QueryParams;
use store::{DeleteParams, StoreParams, UpdateParams};

const DEFAULT_PAGE_LIMIT: usize = 50;
const MAX_PAGE_LIMIT: usize = 200;

/// The Lore MCP tool handler.
#[derive(Clone)]
pub struct LoreTools {
    tool_router: ToolRouter<Self>,
    db: Arc<Mutex<Connection>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    conflicts: Arc<ConflictCache>,
    listener: Arc<dyn ChangeListener>,
    config: Arc<LoreConfig>,
    fts_enabled: bool,
}

#[tool_router]
impl LoreTools {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        conflicts: Arc<ConflictCache>,
        listener: Arc<dyn ChangeListener>,
        config: Arc<LoreConfig>,
        fts_enabled: bool,
    ) -> Self {
        Self {
            tool_router: Self::tool_router(),
            db,
            embedder,
            conflicts,
            listener,
            config,
            fts_enabled,
        }
    }

    /// Run a blocking closure against the serialized connection.
    async fn with_db<T, F>(&self, f: F) -> LoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> LoreResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut conn)
        })
        .await
        .map_err(|e| LoreError::internal(format!("db task failed: {e}")))?
    }

    /// Embed text off the async thread; a failed embed degrades to no vector.
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let provider = self.embedder.clone()?;
        let text = text.to_string();
        match tokio::task::spawn_blocking(move || provider.embed(&text)).await {
            Ok(Ok(vector)) => Some(vector),
            Ok(Err(err)) => {
                tracing::warn!(%err, "embedding failed, continuing without a vector");
                None
            }
            Err(err) => {
                tracing::warn!(%err, "embedding task failed, continuing without a vector");
                None
            }
        }
    }

    fn notify(&self, uris: &[String]) {
        self.listener.resources_changed(uris);
    }

    /// Store a new knowledge entry.
    #[tool(description = "Store a knowledge entry: topic, free-text content, optional tags and provenance (source, actor, confidence).")]
    async fn store(&self, Parameters(params): Parameters<StoreParams>) -> Result<String, String> {
        tracing::info!(topic = %params.topic, content_len = params.content.len(), "store called");

        let embedding = self.embed(&params.content).await;
        let new = NewEntry {
            topic: params.topic,
            content: params.content,
            tags: params.tags.unwrap_or_default(),
            source: params.source,
            actor: params.actor,
            confidence: params.confidence,
            valid_from: params.valid_from,
            valid_to: params.valid_to,
            canonical_entity_id: None,
        };

        let entry = self
            .with_db(move |conn| entries::create_entry(conn, &new, embedding.as_deref()))
            .await
            .map_err(fail)?;

        let uri = format!("lore://entries/{}", entry.id);
        self.notify(&[uri.clone(), "lore://entries".to_string()]);
        ok_envelope(format!("Stored entry {}", entry.id), uri, &entry)
    }

    /// Update an existing entry by field overlay.
    #[tool(description = "Update an entry. Absent fields are preserved; explicit null clears a nullable field.")]
    async fn update(&self, Parameters(params): Parameters<UpdateParams>) -> Result<String, String> {
        let embedding = match params.patch.content.as_deref() {
            Some(content) => self.embed(content).await,
            None => None,
        };

        let id = params.id.clone();
        let patch = params.patch;
        let entry = self
            .with_db(move |conn| entries::update_entry(conn, &id, &patch, embedding.as_deref()))
            .await
            .map_err(fail)?;

        let uri = format!("lore://entries/{}", entry.id);
        self.notify(&[uri.clone(), "lore://entries".to_string()]);
        ok_envelope(format!("Updated entry {}", entry.id), uri, &entry)
    }

    /// Hybrid retrieval over entries.
    #[tool(description = "Search entries with hybrid lexical + semantic + graph ranking. Paginate with the returned cursor; offset is not supported.")]
    async fn query(&self, Parameters(params): Parameters<QueryParams>) -> Result<String, String> {
        if params.offset.is_some() {
            return Err(fail(LoreError::validation(
                "offset is not supported; use cursor pagination",
            )));
        }

        let query_text = [params.topic.as_deref(), params.content.as_deref()]
            .iter()
            .flatten()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if query_text.is_empty() {
            return Err(fail(LoreError::validation(
                "query requires topic or content terms",
            )));
        }

        let retrieval = RetrievalParams {
            query: query_text,
            limit: params
                .limit
                .unwrap_or(self.config.retrieval.default_limit)
                .clamp(1, self.config.retrieval.max_limit),
            cursor: params.cursor,
            weights: Weights {
                lexical: self.config.retrieval.weight_lexical,
                semantic: self.config.retrieval.weight_semantic,
                graph: self.config.retrieval.weight_graph,
            },
            required_tags: params.tags.unwrap_or_default(),
        };

        let embedder = self.embedder.clone();
        let fts_enabled = self.fts_enabled;
        let response = self
            .with_db(move |conn| {
                retrieval::retrieve(conn, fts_enabled, embedder.as_deref(), &retrieval)
            })
            .await
            .map_err(fail)?;

        ok_envelope(
            format!("{} results in {} ms", response.items.len(), response.retrieval_ms),
            "lore://entries",
            &response,
        )
    }

    /// Soft-delete an entry or triple.
    #[tool(description = "Soft-delete an entry or triple by id. Reversible with undo.")]
    async fn delete(&self, Parameters(params): Parameters<DeleteParams>) -> Result<String, String> {
        let id = params.id.clone();
        let entity_type = params.entity_type.clone();

        let uri = match entity_type.as_str() {
            "entry" => {
                let id = id.clone();
                self.with_db(move |conn| entries::delete_entry(conn, &id))
                    .await
                    .map_err(fail)?;
                "lore://entries".to_string()
            }
            "triple" => {
                let id = id.clone();
                self.with_db(move |conn| triples::delete_triple(conn, &id))
                    .await
                    .map_err(fail)?;
                "lore://triples".to_string()
            }
            other => {
                return Err(fail(LoreError::validation(format!(
                    "entity_type must be 'entry' or 'triple', got: {other}"
                ))))
            }
        };

        self.notify(&[uri.clone(), "lore://transactions".to_string()]);
        let payload = serde_json::json!({
            "id": params.id,
            "entity_type": params.entity_type,
            "deleted": true,
        });
        ok_envelope(format!("Deleted {entity_type} {}", params.id), uri, &payload)
    }

    /// Create a relationship, surfacing contradictions instead of writing.
    #[tool(description = "Create a (subject, predicate, object) relationship. A contradicting active triple returns a conflict with resolution options instead of writing.")]
    async fn relate(&self, Parameters(params): Parameters<RelateParams>) -> Result<String, String> {
        let new = NewTriple {
            subject: params.subject,
            predicate: params.predicate,
            object: params.object,
            source: params.source,
            actor: params.actor,
            confidence: params.confidence,
        };

        let cache = Arc::clone(&self.conflicts);
        let outcome = self
            .with_db(move |conn| {
                if let Some(conflict) = conflicts::detect_conflict(conn, &new)? {
                    cache.save(conn, &conflict)?;
                    return Ok(RelateOutcome::Conflict(conflict));
                }
                Ok(RelateOutcome::Created(triples::create_triple(conn, &new)?))
            })
            .await
            .map_err(fail)?;

        match outcome {
            RelateOutcome::Created(triple) => {
                let uri = format!("lore://triples/{}", triple.id);
                self.notify(&[uri.clone(), "lore://triples".to_string()]);
                ok_envelope(format!("Related {} -{}-> {}", triple.subject, triple.predicate, triple.object), uri, &triple)
            }
            RelateOutcome::Conflict(conflict) => {
                tracing::info!(conflict_id = %conflict.conflict_id, "conflicting triple detected");
                ok_envelope(
                    format!(
                        "Conflict: ({}, {}) already maps to '{}'. Resolve with resolve_conflict.",
                        conflict.subject, conflict.predicate, conflict.existing.object
                    ),
                    format!("lore://conflicts/{}", conflict.conflict_id),
                    &conflict,
                )
            }
        }
    }

    /// Query the triple graph.
    #[tool(description = "Query triples by substring filters on subject, predicate, or object.")]
    async fn query_graph(
        &self,
        Parameters(params): Parameters<QueryGraphParams>,
    ) -> Result<String, String> {
        let query = TripleQuery {
            subject: params.subject,
            predicate: params.predicate,
            object: params.object,
            limit: params.limit,
        };
        let items = self
            .with_db(move |conn| triples::query_triples(conn, &query))
            .await
            .map_err(fail)?;

        let found = items.len();
        let payload = serde_json::json!({
            "items": items,
            "next_cursor": null,
        });
        ok_envelope(format!("{found} triples"), "lore://triples", &payload)
    }

    /// Update a triple by field overlay.
    #[tool(description = "Update a triple's predicate, object, or provenance fields.")]
    async fn update_triple(
        &self,
        Parameters(params): Parameters<UpdateTripleParams>,
    ) -> Result<String, String> {
        let id = params.id;
        let patch = params.patch;
        let triple = self
            .with_db(move |conn| triples::update_triple(conn, &id, &patch))
            .await
            .map_err(fail)?;

        let uri = format!("lore://triples/{}", triple.id);
        self.notify(&[uri.clone(), "lore://triples".to_string()]);
        ok_envelope(format!("Updated triple {}", triple.id), uri, &triple)
    }

    /// Upsert the active (subject, predicate) relationship.
    #[tool(description = "Update the active (subject, predicate) triple's object in place, or create it when absent. Returns created=false on update.")]
    async fn upsert_triple(
        &self,
        Parameters(params): Parameters<UpsertTripleParams>,
    ) -> Result<String, String> {
        let new = NewTriple {
            subject: params.subject,
            predicate: params.predicate,
            object: params.object,
            source: params.source,
            actor: params.actor,
            confidence: params.confidence,
        };
        let outcome = self
            .with_db(move |conn| triples::upsert_triple(conn, &new))
            .await
            .map_err(fail)?;

        let uri = format!("lore://triples/{}", outcome.triple.id);
        self.notify(&[uri.clone(), "lore://triples".to_string()]);
        let verb = if outcome.created { "Created" } else { "Updated" };
        ok_envelope(format!("{verb} triple {}", outcome.triple.id), uri, &outcome)
    }

    /// Apply a resolution to a pending conflict.
    #[tool(description = "Resolve a pending conflict by id: 'replace' overwrites the existing triple, 'retain_both' keeps both, 'reject' discards the candidate.")]
    async fn resolve_conflict(
        &self,
        Parameters(params): Parameters<ResolveConflictParams>,
    ) -> Result<String, String> {
        let strategy = Resolution::from_str(&params.strategy)
            .map_err(|e| fail(LoreError::validation(e)))?;

        let cache = Arc::clone(&self.conflicts);
        let conflict_id = params.conflict_id.clone();
        let resolved = self
            .with_db(move |conn| {
                let conflict = cache.load(conn, &conflict_id)?.ok_or_else(|| {
                    LoreError::not_found(format!("conflict not found or expired: {conflict_id}"))
                })?;

                let triple = conflicts::apply_resolution(conn, &conflict, strategy)?;

                // consumed exactly once, whatever the outcome
                cache.remove(conn, &conflict_id)?;
                Ok(triple)
            })
            .await
            .map_err(fail)?;

        if resolved.is_some() {
            self.notify(&["lore://triples".to_string()]);
        }
        let payload = serde_json::json!({
            "conflict_id": params.conflict_id,
            "strategy": params.strategy,
            "triple": resolved,
        });
        ok_envelope(
            format!("Conflict {} resolved with {}", params.conflict_id, params.strategy),
            "lore://triples",
            &payload,
        )
    }

    /// Find-or-create a canonical entity by name.
    #[tool(description = "Find a canonical entity by exact alias or create it (with a lowercase auto-alias). Returns created=true on creation.")]
    async fn upsert_entity(
        &self,
        Parameters(params): Parameters<UpsertEntityParams>,
    ) -> Result<String, String> {
        let name = params.name;
        let outcome = self
            .with_db(move |conn| entities::upsert_entity(conn, &name))
            .await
            .map_err(fail)?;

        let uri = format!("lore://entities/{}", outcome.entity.id);
        if outcome.created {
            self.notify(&[uri.clone()]);
        }
        let verb = if outcome.created { "Created" } else { "Found" };
        ok_envelope(format!("{verb} entity '{}'", outcome.entity.name), uri, &outcome)
    }

    /// Merge one canonical entity into another.
    #[tool(description = "Merge one entity into another: rewrites triple references, reassigns entries and aliases, deletes the merged entity. Reversible with undo.")]
    async fn merge_entities(
        &self,
        Parameters(params): Parameters<MergeEntitiesParams>,
    ) -> Result<String, String> {
        let keep_id = params.keep_id;
        let merge_id = params.merge_id;
        let outcome = self
            .with_db(move |conn| entities::merge_entities(conn, &keep_id, &merge_id))
            .await
            .map_err(fail)?;

        self.notify(&[
            format!("lore://entities/{}", outcome.keep_id),
            "lore://triples".to_string(),
            "lore://entries".to_string(),
        ]);
        ok_envelope(
            format!(
                "Merged {} into {} ({} triples rewritten)",
                outcome.merge_id, outcome.keep_id, outcome.merged_count
            ),
            format!("lore://entities/{}", outcome.keep_id),
            &outcome,
        )
    }

    /// Revert recent mutations.
    #[tool(description = "Revert the most recent N mutations (default 1): creates, updates, deletes, and merges.")]
    async fn undo(&self, Parameters(params): Parameters<UndoParams>) -> Result<String, String> {
        let count = params.count.unwrap_or(1);
        let reverted = self
            .with_db(move |conn| undo::undo(conn, count))
            .await
            .map_err(fail)?;

        if !reverted.is_empty() {
            self.notify(&[
                "lore://entries".to_string(),
                "lore://triples".to_string(),
                "lore://transactions".to_string(),
            ]);
        }
        let payload = serde_json::json!({ "reverted": reverted });
        ok_envelope(
            format!("Reverted {} transaction(s)", payload["reverted"].as_array().map(|a| a.len()).unwrap_or(0)),
            "lore://transactions",
            &payload,
        )
    }

    /// Read the transaction log.
    #[tool(description = "Read recent transactions, newest first, optionally filtered by entity type.")]
    async fn history(&self, Parameters(params): Parameters<HistoryParams>) -> Result<String, String> {
        let limit = params
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let entity_type = params.entity_type;
        let items = self
            .with_db(move |conn| transactions::history(conn, limit, entity_type.as_deref()))
            .await
            .map_err(fail)?;

        let payload = serde_json::json!({ "items": items });
        ok_envelope(
            format!("{} transactions", payload["items"].as_array().map(|a| a.len()).unwrap_or(0)),
            "lore://transactions",
            &payload,
        )
    }

    /// Bulk-ingest raw text into entries.
    #[tool(description = "Chunk raw text into entries with exact-content dedup. Small inputs complete synchronously; larger inputs are processed in background batches.")]
    async fn ingest(&self, Parameters(params): Parameters<IngestParams>) -> Result<String, String> {
        let content = params.content;
        let source = params.source;
        let result = self
            .with_db(move |conn| ingestion::ingest(conn, &content, source.as_deref()))
            .await
            .map_err(fail)?;

        match &result {
            ingestion::IngestResult::Sync { task_id, entries_created, .. } => {
                if *entries_created > 0 {
                    self.notify(&["lore://entries".to_string()]);
                }
                ok_envelope(
                    format!("Ingested synchronously ({entries_created} entries created)"),
                    format!("lore://ingestion/{task_id}"),
                    &result,
                )
            }
            ingestion::IngestResult::Async { task_id } => {
                tokio::spawn(ingestion::run_task(
                    Arc::clone(&self.db),
                    task_id.clone(),
                    Arc::clone(&self.listener),
                ));
                ok_envelope(
                    format!("Queued ingestion task {task_id}; poll ingestion_status"),
                    format!("lore://ingestion/{task_id}"),
                    &result,
                )
            }
        }
    }

    /// Poll an ingestion task.
    #[tool(description = "Report an ingestion task's status and progress counters.")]
    async fn ingestion_status(
        &self,
        Parameters(params): Parameters<IngestionStatusParams>,
    ) -> Result<String, String> {
        let task_id = params.task_id.clone();
        let task = self
            .with_db(move |conn| {
                ingestion::get_task(conn, &task_id)?.ok_or_else(|| {
                    LoreError::not_found(format!("ingestion task not found: {task_id}"))
                })
            })
            .await
            .map_err(fail)?;

        let payload = serde_json::json!({
            "id": task.id,
            "status": task.status,
            "total_items": task.total_items,
            "processed_items": task.processed_items,
            "error": task.error,
        });
        ok_envelope(
            format!("Task {} is {}", task.id, task.status),
            format!("lore://ingestion/{}", task.id),
            &payload,
        )
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum RelateOutcome {
    Created(crate::knowledge::types::Triple),
    Conflict(crate::knowledge::conflicts::ConflictInfo),
}

/// Success envelope: human text + resource blob.
fn ok_envelope<T: Serialize>(
    text: impl Into<String>,
    uri: impl Into<String>,
    data: &T,
) -> Result<String, String> {
    let envelope = serde_json::json!({
        "text": text.into(),
        "resource": {
            "uri": uri.into(),
            "media_type": "application/json",
        },
        "data": data,
    });
    Ok(envelope.to_string())
}

/// Error envelope: `{error, message, retryable}`.
fn fail(err: LoreError) -> String {
    serde_json::json!({
        "error": err.kind,
        "message": err.message,
        "retryable": err.retryable(),
    })
    .to_string()
}

/// Parse a `lore://<table>?limit=..&cursor=..` resource URI.
fn parse_resource_uri(uri: &str) -> Option<(String, usize, Option<String>)> {
    let rest = uri.strip_prefix("lore://")?;
    let (table, query) = match rest.split_once('?') {
        Some((table, query)) => (table, Some(query)),
        None => (rest, None),
    };

    let mut limit = DEFAULT_PAGE_LIMIT;
    let mut cursor = None;
    if let Some(query) = query {
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("limit", value)) => {
                    limit = value.parse().unwrap_or(DEFAULT_PAGE_LIMIT);
                }
                Some(("cursor", value)) => {
                    // malformed cursors silently restart from the first page
                    cursor = retrieval::decode_cursor(value);
                }
                _ => {}
            }
        }
    }
    Some((table.to_string(), limit.clamp(1, MAX_PAGE_LIMIT), cursor))
}

#[tool_handler]
impl ServerHandler for LoreTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Lore is a knowledge store. Use store/query for entries, relate/query_graph \
                 for relationships, upsert_entity/merge_entities for canonical names, and \
                 undo/history for the transaction log."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            ..Default::default()
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        let mut resources = Vec::new();
        for (uri, name) in [
            ("lore://entries", "entries"),
            ("lore://triples", "triples"),
            ("lore://transactions", "transactions"),
        ] {
            let mut resource = RawResource::new(uri, name);
            resource.mime_type = Some("application/json".to_string());
            resources.push(resource.no_annotation());
        }
        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let uri = request.uri.clone();
        let (table, limit, cursor) = parse_resource_uri(&uri)
            .ok_or_else(|| ErrorData::resource_not_found(format!("unknown resource: {uri}"), None))?;

        let page = self
            .with_db(move |conn| {
                let cursor = cursor.as_deref();
                match table.as_str() {
                    "entries" => {
                        let (items, next) = entries::list_page(conn, limit, cursor)?;
                        Ok(Some(page_payload(&items, next)))
                    }
                    "triples" => {
                        let (items, next) = triples::list_page(conn, limit, cursor)?;
                        Ok(Some(page_payload(&items, next)))
                    }
                    "transactions" => {
                        let (items, next) = transactions::list_page(conn, limit, cursor)?;
                        Ok(Some(page_payload(&items, next)))
                    }
                    _ => Ok(None),
                }
            })
            .await
            .map_err(|err| ErrorData::internal_error(err.to_string(), None))?
            .ok_or_else(|| ErrorData::resource_not_found(format!("unknown resource: {uri}"), None))?;

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(page.to_string(), uri)],
        })
    }
}

fn page_payload<T: Serialize>(items: &[T], next: Option<String>) -> serde_json::Value {
    serde_json::json!({
        "items": items,
        "count": items.len(),
        "next_cursor": next.map(|id| retrieval::encode_cursor(&id)),
    })
}
