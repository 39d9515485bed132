//! # Change Events
//!
//! Row-change notifications delivered by the backing feed.
//!
//! Row payloads may be partially or fully redacted by backend row-level
//! security, especially on INSERT broadcast to non-owning observers. The
//! resolver therefore consumes a tagged [`RowPayload`] instead of chasing
//! optional fields through loose JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// New record inserted
    Insert,
    /// Existing record updated
    Update,
    /// Record deleted
    Delete,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Insert => write!(f, "INSERT"),
            EventType::Update => write!(f, "UPDATE"),
            EventType::Delete => write!(f, "DELETE"),
        }
    }
}

/// Event types a subscription listens for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventFilter {
    /// A single event type
    Only(EventType),
    /// All event types (`*`)
    All,
}

impl EventFilter {
    /// Check whether an event type passes this filter
    pub fn matches(&self, event_type: EventType) -> bool {
        match self {
            EventFilter::Only(only) => *only == event_type,
            EventFilter::All => true,
        }
    }
}

impl std::fmt::Display for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventFilter::Only(event_type) => write!(f, "{}", event_type),
            EventFilter::All => write!(f, "*"),
        }
    }
}

/// A row-change notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Table the change occurred on
    pub table: String,

    /// Type of change
    pub event_type: EventType,

    /// New row data (INSERT/UPDATE); may be redacted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_row: Option<Value>,

    /// Old row data (UPDATE/DELETE); may be redacted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_row: Option<Value>,
}

impl ChangeEvent {
    /// Create an INSERT event
    pub fn insert(table: impl Into<String>, new_row: Value) -> Self {
        Self {
            table: table.into(),
            event_type: EventType::Insert,
            new_row: Some(new_row),
            old_row: None,
        }
    }

    /// Create an UPDATE event
    pub fn update(table: impl Into<String>, old_row: Value, new_row: Value) -> Self {
        Self {
            table: table.into(),
            event_type: EventType::Update,
            new_row: Some(new_row),
            old_row: Some(old_row),
        }
    }

    /// Create a DELETE event
    pub fn delete(table: impl Into<String>, old_row: Value) -> Self {
        Self {
            table: table.into(),
            event_type: EventType::Delete,
            new_row: None,
            old_row: Some(old_row),
        }
    }

    /// Create an event whose rows were fully redacted by row-level security
    pub fn redacted(table: impl Into<String>, event_type: EventType) -> Self {
        Self {
            table: table.into(),
            event_type,
            new_row: None,
            old_row: None,
        }
    }

    /// Candidate record id: the `id` field of the new row, falling back
    /// to the old row
    pub fn record_id(&self) -> Option<String> {
        field_as_string(self.new_row.as_ref(), "id")
            .or_else(|| field_as_string(self.old_row.as_ref(), "id"))
    }

    /// Build the resolver payload from the new row's scoping field
    pub fn scope_payload(&self, scope_field: &str) -> RowPayload {
        match field_as_string(self.new_row.as_ref(), scope_field) {
            Some(scope_id) => RowPayload::Known { scope_id },
            None => RowPayload::Redacted,
        }
    }
}

/// Resolver payload: either the scoping identifier survived redaction,
/// or it did not
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowPayload {
    /// Scoping identifier is present; narrow invalidation applies
    Known {
        /// Value of the table's scoping field
        scope_id: String,
    },
    /// Row-level security stripped the identifier; only broad
    /// invalidation is safe
    Redacted,
}

fn field_as_string(row: Option<&Value>, field: &str) -> Option<String> {
    let value = row?.get(field)?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_display() {
        assert_eq!(EventType::Insert.to_string(), "INSERT");
        assert_eq!(EventType::Update.to_string(), "UPDATE");
        assert_eq!(EventType::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_event_filter() {
        assert!(EventFilter::All.matches(EventType::Insert));
        assert!(EventFilter::Only(EventType::Update).matches(EventType::Update));
        assert!(!EventFilter::Only(EventType::Update).matches(EventType::Delete));
        assert_eq!(EventFilter::All.to_string(), "*");
        assert_eq!(EventFilter::Only(EventType::Insert).to_string(), "INSERT");
    }

    #[test]
    fn test_record_id_from_new_row() {
        let event = ChangeEvent::insert("attendance", json!({"id": "A1", "student_id": "S1"}));
        assert_eq!(event.record_id(), Some("A1".to_string()));
    }

    #[test]
    fn test_record_id_falls_back_to_old_row() {
        let event = ChangeEvent::delete("attendance", json!({"id": 42}));
        assert_eq!(event.record_id(), Some("42".to_string()));
    }

    #[test]
    fn test_record_id_missing_when_redacted() {
        let event = ChangeEvent::redacted("attendance", EventType::Insert);
        assert_eq!(event.record_id(), None);
    }

    #[test]
    fn test_scope_payload_known() {
        let event = ChangeEvent::update(
            "attendance",
            json!({"id": "A1"}),
            json!({"id": "A1", "student_id": "S1"}),
        );
        assert_eq!(
            event.scope_payload("student_id"),
            RowPayload::Known {
                scope_id: "S1".to_string()
            }
        );
    }

    #[test]
    fn test_scope_payload_redacted() {
        // INSERT broadcast to a non-owning observer arrives with an empty row
        let event = ChangeEvent::insert("attendance", json!({}));
        assert_eq!(event.scope_payload("student_id"), RowPayload::Redacted);
    }

    #[test]
    fn test_event_serde_uppercase() {
        let event = ChangeEvent::insert("attendance", json!({"id": "A1"}));
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["event_type"], "INSERT");
        assert_eq!(wire["table"], "attendance");
        assert!(wire.get("old_row").is_none());
    }
}
