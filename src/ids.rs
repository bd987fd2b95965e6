//! Identifier and timestamp minting.
//!
//! IDs are 26-character ULIDs: the prefix encodes the millisecond timestamp,
//! the suffix is random, and IDs minted within the same millisecond increment
//! monotonically. Cursor pagination and history ordering rely on plain string
//! comparison, so both [`new_id`] and [`now`] sort lexicographically in
//! chronological order.

use std::sync::{LazyLock, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{SecondsFormat, Utc};
use ulid::{Generator, Ulid};

static GENERATOR: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

/// Mint a new lexicographically sortable ID.
///
/// If the random component overflows within a single millisecond, minting
/// rolls over to the next millisecond instead of failing.
pub fn new_id() -> String {
    let mut gen = GENERATOR.lock().unwrap_or_else(|e| e.into_inner());
    match gen.generate() {
        Ok(id) => id.to_string(),
        Err(_) => {
            let next_ms = SystemTime::now() + Duration::from_millis(1);
            gen.generate_from_datetime(next_ms)
                .map(|id| id.to_string())
                .unwrap_or_else(|_| Ulid::new().to_string())
        }
    }
}

/// Current UTC timestamp with millisecond precision.
///
/// The fixed-width RFC 3339 form (`2026-08-02T12:34:56.789Z`) compares
/// chronologically under string ordering.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_26_chars() {
        assert_eq!(new_id().len(), 26);
    }

    #[test]
    fn ids_minted_back_to_back_strictly_increase() {
        let mut prev = new_id();
        for _ in 0..1000 {
            let next = new_id();
            assert!(next > prev, "{next} should sort after {prev}");
            prev = next;
        }
    }

    #[test]
    fn now_has_millisecond_precision_and_sorts() {
        let a = now();
        assert!(a.ends_with('Z'));
        // 2026-08-02T12:34:56.789Z — 24 chars, fixed width
        assert_eq!(a.len(), 24);
        std::thread::sleep(Duration::from_millis(5));
        let b = now();
        assert!(b > a);
    }
}
