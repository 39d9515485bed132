//! # Cache Key Resolver
//!
//! Pure mapping from `(table, event type, payload)` to cache keys.
//!
//! When the scoping identifier survived redaction the resolver returns the
//! narrow keys for that identifier; when row-level security stripped it,
//! the broad unscoped equivalents cover the same logical views at the cost
//! of extra refetches. Unknown tables resolve to nothing. Never errors.

use crate::cache::CacheKey;
use crate::event::{EventType, RowPayload};

/// Scoping field consulted when mapping an event for `table`
///
/// `None` means the table is not tracked.
pub fn scope_field(table: &str) -> Option<&'static str> {
    match table {
        "attendance" | "student_stickers" | "student_points" | "assignment_submissions" => {
            Some("student_id")
        }
        "assignments" | "announcements" => Some("class_id"),
        "students" => Some("id"),
        _ => None,
    }
}

/// Resolve the cache keys invalidated by one change event
pub fn resolve(table: &str, event_type: EventType, payload: &RowPayload) -> Vec<CacheKey> {
    match table {
        "attendance" => keyed(
            payload,
            &["attendance-calendar", "attendance-rate", "student-dashboard"],
            "attendance",
        ),
        "student_stickers" => keyed(
            payload,
            &["sticker-book", "student-dashboard"],
            "stickers",
        ),
        "student_points" => {
            let mut keys = keyed(
                payload,
                &["points-history", "student-dashboard"],
                "points",
            );
            // Any point change can reorder the leaderboard
            keys.push(broad("leaderboard"));
            keys
        }
        "assignments" => keyed(
            payload,
            &["assignments-by-class", "class-dashboard"],
            "assignments",
        ),
        "assignment_submissions" => keyed(
            payload,
            &["submissions-by-student", "student-dashboard"],
            "submissions",
        ),
        "announcements" => keyed(payload, &["announcements-by-class"], "announcements"),
        "students" => {
            let mut keys = keyed(payload, &["student-profile"], "students");
            if matches!(event_type, EventType::Insert | EventType::Delete) {
                // Membership changed; rosters are keyed by class, which the
                // student payload does not carry
                keys.push(broad("class-roster"));
            }
            keys
        }
        _ => Vec::new(),
    }
}

/// Keys a subscription on `table` can ever invalidate for `payload`
///
/// Union of [`resolve`] across all event types, order-stable and unique.
/// Used to declare a subscription's cache keys for catch-up invalidation.
pub fn declared(table: &str, payload: &RowPayload) -> Vec<CacheKey> {
    let mut keys = Vec::new();
    for event_type in [EventType::Insert, EventType::Update, EventType::Delete] {
        for key in resolve(table, event_type, payload) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

fn broad(name: &str) -> CacheKey {
    CacheKey::new([name])
}

fn scoped(name: &str, id: &str) -> CacheKey {
    CacheKey::new([name, id])
}

/// The general table key, then each view key either scoped to the payload
/// identifier or broad when redacted
fn keyed(payload: &RowPayload, views: &[&str], table_key: &str) -> Vec<CacheKey> {
    let mut keys = vec![broad(table_key)];
    match payload {
        RowPayload::Known { scope_id } => {
            keys.extend(views.iter().map(|view| scoped(view, scope_id)));
        }
        RowPayload::Redacted => {
            keys.extend(views.iter().map(|view| broad(view)));
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(id: &str) -> RowPayload {
        RowPayload::Known {
            scope_id: id.to_string(),
        }
    }

    #[test]
    fn test_attendance_narrow_keys() {
        let keys = resolve("attendance", EventType::Update, &known("S1"));
        assert_eq!(
            keys,
            vec![
                CacheKey::new(["attendance"]),
                CacheKey::new(["attendance-calendar", "S1"]),
                CacheKey::new(["attendance-rate", "S1"]),
                CacheKey::new(["student-dashboard", "S1"]),
            ]
        );
    }

    #[test]
    fn test_attendance_broad_fallback() {
        let keys = resolve("attendance", EventType::Insert, &RowPayload::Redacted);
        assert_eq!(
            keys,
            vec![
                CacheKey::new(["attendance"]),
                CacheKey::new(["attendance-calendar"]),
                CacheKey::new(["attendance-rate"]),
                CacheKey::new(["student-dashboard"]),
            ]
        );
    }

    #[test]
    fn test_points_always_touch_leaderboard() {
        let narrow = resolve("student_points", EventType::Update, &known("S1"));
        assert!(narrow.contains(&CacheKey::new(["leaderboard"])));

        let broad = resolve("student_points", EventType::Update, &RowPayload::Redacted);
        assert!(broad.contains(&CacheKey::new(["leaderboard"])));
    }

    #[test]
    fn test_student_membership_changes_hit_rosters() {
        let update = resolve("students", EventType::Update, &known("S1"));
        assert!(!update.contains(&CacheKey::new(["class-roster"])));

        let insert = resolve("students", EventType::Insert, &known("S1"));
        assert!(insert.contains(&CacheKey::new(["class-roster"])));

        let delete = resolve("students", EventType::Delete, &RowPayload::Redacted);
        assert!(delete.contains(&CacheKey::new(["class-roster"])));
    }

    #[test]
    fn test_unknown_table_is_noop() {
        assert!(resolve("audit_log", EventType::Insert, &known("X")).is_empty());
        assert!(resolve("audit_log", EventType::Delete, &RowPayload::Redacted).is_empty());
    }

    #[test]
    fn test_declared_unions_event_types() {
        let keys = declared("students", &known("S1"));
        assert_eq!(
            keys,
            vec![
                CacheKey::new(["students"]),
                CacheKey::new(["student-profile", "S1"]),
                CacheKey::new(["class-roster"]),
            ]
        );
    }

    #[test]
    fn test_scope_fields() {
        assert_eq!(scope_field("attendance"), Some("student_id"));
        assert_eq!(scope_field("assignments"), Some("class_id"));
        assert_eq!(scope_field("students"), Some("id"));
        assert_eq!(scope_field("audit_log"), None);
    }
}
