//! The closed error taxonomy used by every core component.
//!
//! All fallible core APIs return [`LoreResult`]. The kind determines whether
//! the protocol layer advertises the failure as retryable: `dependency` and
//! `internal` are transient, the rest are caller mistakes.

use serde::Serialize;
use thiserror::Error;

/// Failure categories surfaced in error envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input shape: missing fields, over-long text, malformed ids.
    Validation,
    /// Referenced row is missing or soft-deleted.
    NotFound,
    /// Contradictory triple for the same (subject, predicate).
    Conflict,
    /// Required-field or confidence-floor policy rejection.
    Policy,
    /// External collaborator unavailable.
    Dependency,
    /// Unexpected state inside the store.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Policy => "policy",
            Self::Dependency => "dependency",
            Self::Internal => "internal",
        }
    }

    /// Whether a caller may retry the same request unchanged.
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Dependency | Self::Internal)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only error type core components raise.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct LoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl LoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Conflict,
            message: message.into(),
        }
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Policy,
            message: message.into(),
        }
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Dependency,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

impl From<rusqlite::Error> for LoreError {
    fn from(err: rusqlite::Error) -> Self {
        LoreError::internal(format!("storage error: {err}"))
    }
}

impl From<serde_json::Error> for LoreError {
    fn from(err: serde_json::Error) -> Self {
        LoreError::internal(format!("serialization error: {err}"))
    }
}

pub type LoreResult<T> = Result<T, LoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_split_matches_taxonomy() {
        assert!(!LoreError::validation("x").retryable());
        assert!(!LoreError::not_found("x").retryable());
        assert!(!LoreError::conflict("x").retryable());
        assert!(!LoreError::policy("x").retryable());
        assert!(LoreError::dependency("x").retryable());
        assert!(LoreError::internal("x").retryable());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = LoreError::not_found("entry missing: abc");
        assert_eq!(err.to_string(), "not_found: entry missing: abc");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }
}
