//! Persistent, protocol-mediated knowledge for AI assistants.
//!
//! Lore is an [MCP](https://modelcontextprotocol.io/) server that gives an
//! LLM assistant a durable knowledge store: free-text entries, graph triples,
//! and canonical entities, all with provenance, all reversible. Every
//! mutation lands in an append-only transaction log, so creates, updates,
//! deletes, and even entity merges can be undone.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with an FTS5 lexical index (substring fallback when
//!   the engine lacks it) and [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for the vector index
//! - **Retrieval**: lexical, semantic, and graph-neighborhood scorers fused
//!   with configurable weights; opaque cursor pagination
//! - **Undo**: per-mutation before/after snapshots; merges record affected
//!   row ids so reversal is exact
//! - **Transport**: MCP over stdio (primary) or streamable HTTP
//!
//! # Modules
//!
//! - [`config`] — TOML configuration with environment overrides
//! - [`db`] — SQLite initialization, schema, migrations, health checks
//! - [`embedding`] — text-to-vector seam with a deterministic default
//! - [`knowledge`] — entries, triples, entities, transactions, undo, policy
//! - [`retrieval`] — the hybrid scorer pipeline
//! - [`ingest`] — chunked bulk ingestion, sync and task-queued

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ids;
pub mod ingest;
pub mod knowledge;
pub mod notify;
pub mod retrieval;
