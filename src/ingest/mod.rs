//! Bulk text ingestion — chunking, dedup, and the task-queued async path.
//!
//! Small inputs ingest synchronously chunk by chunk. Larger inputs become a
//! pending task whose inline blob is processed in batches of up to
//! [`BATCH_SIZE`] chunks per invocation; `processed_items` advances after
//! each committed chunk, so a crashed batch resumes from the last counter.
//! The batcher assumes a single-writer execution context per store, which is
//! what the serialized connection provides — no optimistic locking.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{LoreError, LoreResult};
use crate::ids;
use crate::knowledge::entries::{self, NewEntry};
use crate::knowledge::types::{IngestionTask, INGESTION_TASK_COLUMNS};
use crate::notify::ChangeListener;

/// Paragraphs are greedily packed into chunks up to this many characters.
pub const CHUNK_MAX_CHARS: usize = 500;
/// Content at or below this length (and chunk count) ingests synchronously.
pub const SYNC_MAX_CHARS: usize = 5_000;
pub const SYNC_MAX_CHUNKS: usize = 20;
/// Inline async content cap; callers above it must pre-chunk.
pub const INLINE_MAX_BYTES: usize = 900_000;
/// Chunks processed per async batch invocation.
pub const BATCH_SIZE: usize = 10;
/// Delay between scheduler re-invocations.
pub const BATCH_DELAY: Duration = Duration::from_secs(1);

const TOPIC_PREVIEW_CHARS: usize = 100;

/// What the ingest operation returns.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum IngestResult {
    /// Sync path: counters are final.
    Sync {
        task_id: String,
        entries_created: usize,
        duplicates_skipped: usize,
    },
    /// Async path: progress is visible via ingestion_status.
    Async { task_id: String },
}

/// Outcome of one async batch.
#[derive(Debug)]
pub struct BatchReport {
    pub processed: usize,
    pub created: usize,
    pub skipped: usize,
    pub remaining: usize,
}

/// The inline blob a pending task stores in `input_uri`.
#[derive(Debug, Serialize, Deserialize)]
struct InlineInput {
    content: String,
    source: Option<String>,
}

/// Split input into paragraphs on blank-line runs, then greedily concatenate
/// into chunks of at most [`CHUNK_MAX_CHARS`] characters. A paragraph is
/// never split, even when it alone exceeds the budget.
pub fn chunk_content(content: &str) -> Vec<String> {
    let paragraphs: Vec<&str> = content
        .split("\n\n")
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for paragraph in paragraphs {
        if current.is_empty() {
            current = paragraph.to_string();
        } else if current.chars().count() + 2 + paragraph.chars().count() <= CHUNK_MAX_CHARS {
            current.push_str("\n\n");
            current.push_str(paragraph);
        } else {
            chunks.push(current);
            current = paragraph.to_string();
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Ingest content, choosing the sync or async path by size.
pub fn ingest(conn: &mut Connection, content: &str, source: Option<&str>) -> LoreResult<IngestResult> {
    if content.trim().is_empty() {
        return Err(LoreError::validation("content must not be empty"));
    }

    let chunks = chunk_content(content);
    if content.chars().count() <= SYNC_MAX_CHARS && chunks.len() <= SYNC_MAX_CHUNKS {
        return ingest_sync(conn, &chunks, source);
    }

    if content.len() > INLINE_MAX_BYTES {
        return Err(LoreError::validation(format!(
            "inline content exceeds {INLINE_MAX_BYTES} bytes; pre-chunk before ingesting"
        )));
    }

    let task_id = create_pending_task(
        conn,
        &InlineInput {
            content: content.to_string(),
            source: source.map(|s| s.to_string()),
        },
        chunks.len(),
    )?;
    tracing::info!(task_id = %task_id, chunks = chunks.len(), "queued async ingestion");
    Ok(IngestResult::Async { task_id })
}

/// Synchronous path: process every chunk now, return final counters.
fn ingest_sync(
    conn: &mut Connection,
    chunks: &[String],
    source: Option<&str>,
) -> LoreResult<IngestResult> {
    let task_id = ids::new_id();
    let now = ids::now();
    conn.execute(
        "INSERT INTO ingestion_tasks (id, status, total_items, processed_items, created_at, updated_at) \
         VALUES (?1, 'processing', ?2, 0, ?3, ?3)",
        params![task_id, chunks.len() as i64, now],
    )?;

    let mut created = 0usize;
    let mut skipped = 0usize;
    for chunk in chunks {
        if ingest_chunk(conn, chunk, source, &task_id)? {
            created += 1;
        } else {
            skipped += 1;
        }
        advance_progress(conn, &task_id, (created + skipped) as i64)?;
    }

    set_status(conn, &task_id, "completed", None)?;

    Ok(IngestResult::Sync {
        task_id,
        entries_created: created,
        duplicates_skipped: skipped,
    })
}

/// Process up to [`BATCH_SIZE`] chunks of an async task, resuming from its
/// committed `processed_items` counter.
pub fn process_batch(conn: &mut Connection, task_id: &str) -> LoreResult<BatchReport> {
    let task = get_task(conn, task_id)?
        .ok_or_else(|| LoreError::not_found(format!("ingestion task not found: {task_id}")))?;

    if task.status == "completed" || task.status == "failed" {
        return Ok(BatchReport {
            processed: 0,
            created: 0,
            skipped: 0,
            remaining: 0,
        });
    }

    let input: InlineInput = match task
        .input_uri
        .as_deref()
        .ok_or(())
        .and_then(|raw| serde_json::from_str(raw).map_err(|_| ()))
    {
        Ok(input) => input,
        Err(()) => {
            let message = "ingestion input is missing or unparseable";
            set_status(conn, task_id, "failed", Some(message))?;
            return Err(LoreError::validation(message));
        }
    };

    let chunks = chunk_content(&input.content);

    if task.status == "pending" {
        conn.execute(
            "UPDATE ingestion_tasks SET status = 'processing', total_items = ?1, updated_at = ?2 \
             WHERE id = ?3",
            params![chunks.len() as i64, ids::now(), task_id],
        )?;
    }

    let start = task.processed_items.max(0) as usize;
    let window = chunks.iter().skip(start).take(BATCH_SIZE);

    let mut processed = 0usize;
    let mut created = 0usize;
    let mut skipped = 0usize;
    for chunk in window {
        if ingest_chunk(conn, chunk, input.source.as_deref(), task_id)? {
            created += 1;
        } else {
            skipped += 1;
        }
        processed += 1;
        // the counter commits per chunk so a crash resumes exactly here
        advance_progress(conn, task_id, (start + processed) as i64)?;
    }

    let remaining = chunks.len().saturating_sub(start + processed);
    if remaining == 0 {
        set_status(conn, task_id, "completed", None)?;
        tracing::info!(task_id = %task_id, total = chunks.len(), "ingestion completed");
    }

    Ok(BatchReport {
        processed,
        created,
        skipped,
        remaining,
    })
}

/// Drive an async task to completion, re-enqueueing with a short delay while
/// batches remain and notifying the change listener after processed work.
pub async fn run_task(
    db: Arc<Mutex<Connection>>,
    task_id: String,
    listener: Arc<dyn ChangeListener>,
) {
    loop {
        let db_batch = Arc::clone(&db);
        let id = task_id.clone();
        let report = tokio::task::spawn_blocking(move || {
            let mut conn = db_batch.lock().unwrap_or_else(|e| e.into_inner());
            process_batch(&mut conn, &id)
        })
        .await;

        let report = match report {
            Ok(Ok(report)) => report,
            Ok(Err(err)) => {
                tracing::error!(task_id = %task_id, %err, "ingestion batch failed");
                return;
            }
            Err(err) => {
                tracing::error!(task_id = %task_id, %err, "ingestion batch panicked");
                return;
            }
        };

        if report.processed > 0 {
            listener.resources_changed(&[
                "lore://entries".to_string(),
                format!("lore://ingestion/{task_id}"),
            ]);
        }
        if report.remaining == 0 {
            return;
        }
        tokio::time::sleep(BATCH_DELAY).await;
    }
}

/// Fetch an ingestion task row.
pub fn get_task(conn: &Connection, task_id: &str) -> LoreResult<Option<IngestionTask>> {
    let task = conn
        .query_row(
            &format!("SELECT {INGESTION_TASK_COLUMNS} FROM ingestion_tasks WHERE id = ?1"),
            params![task_id],
            IngestionTask::from_row,
        )
        .optional()?;
    Ok(task)
}

/// One chunk: dedup against active entries by exact content, else create.
/// Returns whether an entry was created.
fn ingest_chunk(
    conn: &mut Connection,
    chunk: &str,
    source: Option<&str>,
    task_id: &str,
) -> LoreResult<bool> {
    if entries::find_by_exact_content(conn, chunk)?.is_some() {
        return Ok(false);
    }

    let topic = chunk
        .lines()
        .next()
        .map(|line| truncate_chars(line.trim(), TOPIC_PREVIEW_CHARS))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "ingested".to_string());

    entries::create_entry(
        conn,
        &NewEntry {
            topic,
            content: chunk.to_string(),
            tags: vec!["ingested".to_string()],
            source: Some(
                source
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("ingestion:{task_id}")),
            ),
            ..Default::default()
        },
        None,
    )?;
    Ok(true)
}

fn create_pending_task(conn: &Connection, input: &InlineInput, total: usize) -> LoreResult<String> {
    let task_id = ids::new_id();
    let now = ids::now();
    conn.execute(
        "INSERT INTO ingestion_tasks (id, status, input_uri, total_items, processed_items, created_at, updated_at) \
         VALUES (?1, 'pending', ?2, ?3, 0, ?4, ?4)",
        params![task_id, serde_json::to_string(input)?, total as i64, now],
    )?;
    Ok(task_id)
}

/// Monotone counter advance; the status machine never moves backwards.
fn advance_progress(conn: &Connection, task_id: &str, processed: i64) -> LoreResult<()> {
    conn.execute(
        "UPDATE ingestion_tasks SET processed_items = MAX(processed_items, ?1), updated_at = ?2 \
         WHERE id = ?3",
        params![processed, ids::now(), task_id],
    )?;
    Ok(())
}

fn set_status(conn: &Connection, task_id: &str, status: &str, error: Option<&str>) -> LoreResult<()> {
    conn.execute(
        "UPDATE ingestion_tasks SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
        params![status, error, ids::now(), task_id],
    )?;
    Ok(())
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
