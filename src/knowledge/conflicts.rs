//! Advisory conflict detection and the per-session conflict cache.
//!
//! A conflict is two active triples with the same (subject, predicate) but
//! different objects. Detection never mutates anything: it returns a
//! [`ConflictInfo`] that the protocol layer surfaces with the allowed
//! resolutions, parked in the cache until the client resolves it. Cache
//! entries live one hour and are consumed exactly once.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use crate::error::{LoreError, LoreResult};
use crate::ids;
use crate::knowledge::triples::{self, NewTriple};
use crate::knowledge::types::Triple;

/// How long an unresolved conflict stays loadable.
pub const CONFLICT_TTL_SECS: i64 = 3600;

/// Bound on the in-memory fallback store.
pub const MEMORY_CAPACITY: usize = 100;

/// How a client may resolve a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Overwrite the existing triple's object and provenance.
    Replace,
    /// Keep the existing triple and add the candidate alongside it.
    RetainBoth,
    /// Discard the candidate; the store is unchanged.
    Reject,
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(Self::Replace),
            "retain_both" => Ok(Self::RetainBoth),
            "reject" => Ok(Self::Reject),
            _ => Err(format!("unknown resolution strategy: {s}")),
        }
    }
}

/// A detected contradiction awaiting client resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub conflict_id: String,
    pub subject: String,
    pub predicate: String,
    /// One existing active triple whose object differs from the candidate's.
    pub existing: Triple,
    /// The incoming triple that was not written.
    pub candidate: NewTriple,
    pub candidate_resolutions: Vec<Resolution>,
}

/// Check an incoming triple against the active (subject, predicate) scope.
///
/// Same-object triples are not conflicts. Returns at most one conflict; the
/// client resolves against the newest contradicting row.
pub fn detect_conflict(conn: &Connection, candidate: &NewTriple) -> LoreResult<Option<ConflictInfo>> {
    let scope = triples::active_by_subject_predicate(conn, &candidate.subject, &candidate.predicate)?;
    let existing = scope.into_iter().find(|t| t.object != candidate.object);

    Ok(existing.map(|existing| ConflictInfo {
        conflict_id: ids::new_id(),
        subject: candidate.subject.clone(),
        predicate: candidate.predicate.clone(),
        existing,
        candidate: candidate.clone(),
        candidate_resolutions: vec![Resolution::Replace, Resolution::RetainBoth, Resolution::Reject],
    }))
}

/// Apply a client-chosen resolution to a detected conflict.
///
/// `replace` overwrites the existing triple's object and provenance with the
/// candidate's; `retain_both` writes the candidate alongside; `reject` leaves
/// the store unchanged. Returns the written triple, if any.
pub fn apply_resolution(
    conn: &mut Connection,
    conflict: &ConflictInfo,
    resolution: Resolution,
) -> LoreResult<Option<Triple>> {
    match resolution {
        Resolution::Replace => {
            let patch = triples::TriplePatch {
                object: Some(conflict.candidate.object.clone()),
                source: Some(conflict.candidate.source.clone()),
                actor: Some(conflict.candidate.actor.clone()),
                confidence: Some(conflict.candidate.confidence),
                ..Default::default()
            };
            Ok(Some(triples::update_triple(conn, &conflict.existing.id, &patch)?))
        }
        Resolution::RetainBoth => Ok(Some(triples::create_triple(conn, &conflict.candidate)?)),
        Resolution::Reject => Ok(None),
    }
}

/// Short-lived store for pending conflicts.
///
/// The durable backend persists under `conflict:<id>` in the session_state
/// table with a wall-clock stored_at; the fallback is a bounded in-memory map
/// with first-insertion eviction.
pub enum ConflictCache {
    Durable,
    Memory(Mutex<MemoryStore>),
}

pub struct MemoryStore {
    items: HashMap<String, (ConflictInfo, Instant)>,
    order: VecDeque<String>,
}

impl ConflictCache {
    /// Backend persisting into the database the caller passes to each op.
    pub fn durable() -> Self {
        Self::Durable
    }

    pub fn in_memory() -> Self {
        Self::Memory(Mutex::new(MemoryStore {
            items: HashMap::new(),
            order: VecDeque::new(),
        }))
    }

    pub fn save(&self, conn: &Connection, info: &ConflictInfo) -> LoreResult<()> {
        match self {
            Self::Durable => {
                conn.execute(
                    "INSERT OR REPLACE INTO session_state (key, value, stored_at) \
                     VALUES (?1, ?2, ?3)",
                    params![cache_key(&info.conflict_id), serde_json::to_string(info)?, ids::now()],
                )?;
                Ok(())
            }
            Self::Memory(store) => {
                let mut store = store.lock().unwrap_or_else(|e| e.into_inner());
                if !store.items.contains_key(&info.conflict_id) && store.items.len() >= MEMORY_CAPACITY
                {
                    if let Some(oldest) = store.order.pop_front() {
                        store.items.remove(&oldest);
                    }
                }
                if store.items.insert(info.conflict_id.clone(), (info.clone(), Instant::now())).is_none()
                {
                    store.order.push_back(info.conflict_id.clone());
                }
                Ok(())
            }
        }
    }

    /// Load a pending conflict; expired entries are evicted and read as None.
    pub fn load(&self, conn: &Connection, conflict_id: &str) -> LoreResult<Option<ConflictInfo>> {
        match self {
            Self::Durable => {
                let row: Option<(String, String)> = conn
                    .query_row(
                        "SELECT value, stored_at FROM session_state WHERE key = ?1",
                        params![cache_key(conflict_id)],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;

                let Some((value, stored_at)) = row else {
                    return Ok(None);
                };

                if expired(&stored_at) {
                    self.remove(conn, conflict_id)?;
                    return Ok(None);
                }

                let info = serde_json::from_str(&value).map_err(|err| {
                    LoreError::internal(format!("corrupt cached conflict {conflict_id}: {err}"))
                })?;
                Ok(Some(info))
            }
            Self::Memory(store) => {
                let mut store = store.lock().unwrap_or_else(|e| e.into_inner());
                let expired = store
                    .items
                    .get(conflict_id)
                    .map(|(_, at)| at.elapsed().as_secs() as i64 > CONFLICT_TTL_SECS)
                    .unwrap_or(false);
                if expired {
                    store.items.remove(conflict_id);
                    store.order.retain(|k| k != conflict_id);
                    return Ok(None);
                }
                Ok(store.items.get(conflict_id).map(|(info, _)| info.clone()))
            }
        }
    }

    pub fn remove(&self, conn: &Connection, conflict_id: &str) -> LoreResult<()> {
        match self {
            Self::Durable => {
                conn.execute(
                    "DELETE FROM session_state WHERE key = ?1",
                    params![cache_key(conflict_id)],
                )?;
                Ok(())
            }
            Self::Memory(store) => {
                let mut store = store.lock().unwrap_or_else(|e| e.into_inner());
                store.items.remove(conflict_id);
                store.order.retain(|k| k != conflict_id);
                Ok(())
            }
        }
    }
}

fn cache_key(conflict_id: &str) -> String {
    format!("conflict:{conflict_id}")
}

/// Whether a wall-clock stored_at timestamp is past the TTL.
fn expired(stored_at: &str) -> bool {
    match chrono::DateTime::parse_from_rfc3339(stored_at) {
        Ok(at) => {
            let age = chrono::Utc::now().signed_duration_since(at);
            age.num_seconds() > CONFLICT_TTL_SECS
        }
        // unreadable timestamps are treated as stale
        Err(_) => true,
    }
}
