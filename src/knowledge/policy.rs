//! Mutation guardrails.
//!
//! A process-wide policy configuration holds a per-operation required-fields
//! map and a global minimum-confidence floor. [`check_policy`] runs before
//! any mutation touches storage. The setters exist for initialization and
//! test setup only; all mutation paths consult the same config.

use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use crate::config::PolicyFileConfig;
use crate::error::{LoreError, LoreResult};

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Operation name -> fields that must be present and non-empty.
    pub required_fields: HashMap<String, Vec<String>>,
    /// Mutations carrying a numeric confidence below this floor are rejected.
    /// A floor of 0.0 admits everything.
    pub min_confidence: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let mut required_fields = HashMap::new();
        required_fields.insert(
            "store".to_string(),
            vec!["topic".to_string(), "content".to_string()],
        );
        required_fields.insert(
            "relate".to_string(),
            vec![
                "subject".to_string(),
                "predicate".to_string(),
                "object".to_string(),
            ],
        );
        Self {
            required_fields,
            min_confidence: 0.0,
        }
    }
}

static POLICY: LazyLock<RwLock<PolicyConfig>> =
    LazyLock::new(|| RwLock::new(PolicyConfig::default()));

/// Validate mutation parameters against the active policy.
///
/// A required field must be present, non-null, and (for strings) non-empty.
/// A `confidence` field is only checked when numerically present; absent
/// confidence passes unless the operation's required list names it.
pub fn check_policy(op: &str, params: &serde_json::Value) -> LoreResult<()> {
    let policy = POLICY.read().unwrap_or_else(|e| e.into_inner());

    if let Some(required) = policy.required_fields.get(op) {
        for field in required {
            let present = match params.get(field) {
                None | Some(serde_json::Value::Null) => false,
                Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(LoreError::policy(format!(
                    "required field missing or empty for {op}: {field}"
                )));
            }
        }
    }

    if let Some(confidence) = params.get("confidence").and_then(|v| v.as_f64()) {
        if confidence < policy.min_confidence {
            return Err(LoreError::policy(format!(
                "confidence {confidence} is below the minimum of {}",
                policy.min_confidence
            )));
        }
    }

    Ok(())
}

/// Replace the required-fields list for one operation.
pub fn set_required_fields(op: &str, fields: Vec<String>) {
    let mut policy = POLICY.write().unwrap_or_else(|e| e.into_inner());
    policy.required_fields.insert(op.to_string(), fields);
}

/// Set the global minimum-confidence floor.
pub fn set_min_confidence(floor: f64) {
    let mut policy = POLICY.write().unwrap_or_else(|e| e.into_inner());
    policy.min_confidence = floor;
}

/// Restore built-in defaults. Intended for test setup.
pub fn reset_defaults() {
    let mut policy = POLICY.write().unwrap_or_else(|e| e.into_inner());
    *policy = PolicyConfig::default();
}

/// Apply file-based policy configuration at startup.
pub fn configure(file: &PolicyFileConfig) {
    let mut policy = POLICY.write().unwrap_or_else(|e| e.into_inner());
    for (op, fields) in &file.required_fields {
        policy.required_fields.insert(op.clone(), fields.clone());
    }
    if let Some(floor) = file.min_confidence {
        policy.min_confidence = floor;
    }
}
