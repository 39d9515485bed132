//! # Subscription Profiles
//!
//! Role-scoped subscription profiles and the pure builder that produces
//! them.
//!
//! A profile is created once per session and replaced wholesale when the
//! scope changes; it is never mutated in place. Building is deterministic:
//! identical inputs always yield an identical channel name and subscription
//! list.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::CacheKey;
use crate::config::RealtimeConfig;
use crate::event::{EventFilter, EventType, RowPayload};
use crate::resolver;

/// Session role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Parent,
    Admin,
}

impl Role {
    /// Stable lowercase name, used in channel names
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Parent => "parent",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role-specific identifier set determining which rows a session observes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ScopeContext {
    Student {
        student_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        class_id: Option<String>,
    },
    Teacher {
        teacher_id: String,
        school_id: String,
        class_ids: Vec<String>,
    },
    Parent {
        parent_id: String,
        child_ids: Vec<String>,
    },
    Admin {
        school_id: String,
    },
}

impl ScopeContext {
    /// Role this scope belongs to
    pub fn role(&self) -> Role {
        match self {
            ScopeContext::Student { .. } => Role::Student,
            ScopeContext::Teacher { .. } => Role::Teacher,
            ScopeContext::Parent { .. } => Role::Parent,
            ScopeContext::Admin { .. } => Role::Admin,
        }
    }

    /// Primary scoping id; channel names are unique per (role, primary id)
    pub fn primary_id(&self) -> &str {
        match self {
            ScopeContext::Student { student_id, .. } => student_id,
            ScopeContext::Teacher { teacher_id, .. } => teacher_id,
            ScopeContext::Parent { parent_id, .. } => parent_id,
            ScopeContext::Admin { school_id } => school_id,
        }
    }
}

/// One table-level listener within a profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Table to listen on
    pub table: String,

    /// Event types to receive
    pub event_filter: EventFilter,

    /// Backend row filter, e.g. `student_id=eq.S1`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_filter: Option<String>,

    /// Cache keys this subscription can invalidate; used for catch-up
    pub cache_keys: Vec<CacheKey>,
}

/// Immutable subscription profile for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSubscriptionProfile {
    /// Channel name, unique per (role, primary scoping id)
    pub channel_name: String,

    /// Table listeners; empty when the scope has nothing to observe
    pub subscriptions: Vec<SubscriptionConfig>,

    /// Trailing-edge debounce window for this profile's invalidations
    pub debounce_window: Duration,
}

impl RoleSubscriptionProfile {
    /// Check if the profile declares no subscriptions
    ///
    /// Callers must not open a channel for an empty profile.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Every cache key declared anywhere in the profile, unique and
    /// order-stable; the catch-up invalidation set
    pub fn declared_keys(&self) -> Vec<CacheKey> {
        let mut keys = Vec::new();
        for sub in &self.subscriptions {
            for key in &sub.cache_keys {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }
}

/// Pure, deterministic profile builder
#[derive(Debug, Clone)]
pub struct ProfileBuilder {
    config: RealtimeConfig,
}

impl ProfileBuilder {
    /// Create a builder with the given configuration
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }

    /// Build the subscription profile for a resolved scope
    ///
    /// An empty scope collection (teacher with no classes, parent with no
    /// linked children) yields an empty subscription list under a stable
    /// channel name.
    pub fn build(&self, scope: &ScopeContext) -> RoleSubscriptionProfile {
        let channel_name = format!("{}-{}", scope.role(), scope.primary_id());

        let (subscriptions, debounce_window) = match scope {
            ScopeContext::Student {
                student_id,
                class_id,
            } => (
                self.student_subscriptions(student_id, class_id.as_deref()),
                self.config.interactive_debounce(),
            ),
            ScopeContext::Teacher {
                school_id,
                class_ids,
                ..
            } => (
                self.teacher_subscriptions(school_id, class_ids),
                self.config.dashboard_debounce(),
            ),
            ScopeContext::Parent { child_ids, .. } => (
                self.parent_subscriptions(child_ids),
                self.config.dashboard_debounce(),
            ),
            ScopeContext::Admin { school_id } => (
                self.admin_subscriptions(school_id),
                self.config.dashboard_debounce(),
            ),
        };

        RoleSubscriptionProfile {
            channel_name,
            subscriptions,
            debounce_window,
        }
    }

    fn student_subscriptions(
        &self,
        student_id: &str,
        class_id: Option<&str>,
    ) -> Vec<SubscriptionConfig> {
        let student = RowPayload::Known {
            scope_id: student_id.to_string(),
        };

        let mut subs = vec![
            subscription("attendance", EventFilter::All, eq("student_id", student_id), &student),
            subscription(
                "student_stickers",
                EventFilter::All,
                eq("student_id", student_id),
                &student,
            ),
            subscription(
                "student_points",
                EventFilter::All,
                eq("student_id", student_id),
                &student,
            ),
            subscription(
                "assignment_submissions",
                EventFilter::All,
                eq("student_id", student_id),
                &student,
            ),
        ];

        if let Some(class_id) = class_id {
            let class = RowPayload::Known {
                scope_id: class_id.to_string(),
            };
            subs.push(subscription(
                "assignments",
                EventFilter::All,
                eq("class_id", class_id),
                &class,
            ));
            // Students only care about announcements appearing
            subs.push(subscription(
                "announcements",
                EventFilter::Only(EventType::Insert),
                eq("class_id", class_id),
                &class,
            ));
        }

        subs
    }

    fn teacher_subscriptions(
        &self,
        school_id: &str,
        class_ids: &[String],
    ) -> Vec<SubscriptionConfig> {
        if class_ids.is_empty() {
            return Vec::new();
        }

        let classes = self.in_filter("class_id", class_ids);
        vec![
            subscription("attendance", EventFilter::All, classes.clone(), &RowPayload::Redacted),
            subscription("assignments", EventFilter::All, classes.clone(), &RowPayload::Redacted),
            subscription(
                "assignment_submissions",
                EventFilter::All,
                classes.clone(),
                &RowPayload::Redacted,
            ),
            subscription("students", EventFilter::All, classes, &RowPayload::Redacted),
            subscription(
                "announcements",
                EventFilter::All,
                eq("school_id", school_id),
                &RowPayload::Redacted,
            ),
        ]
    }

    fn parent_subscriptions(&self, child_ids: &[String]) -> Vec<SubscriptionConfig> {
        if child_ids.is_empty() {
            return Vec::new();
        }

        let children = self.in_filter("student_id", child_ids);
        vec![
            subscription("attendance", EventFilter::All, children.clone(), &RowPayload::Redacted),
            subscription(
                "student_stickers",
                EventFilter::All,
                children.clone(),
                &RowPayload::Redacted,
            ),
            subscription(
                "student_points",
                EventFilter::All,
                children.clone(),
                &RowPayload::Redacted,
            ),
            subscription(
                "assignment_submissions",
                EventFilter::All,
                children,
                &RowPayload::Redacted,
            ),
        ]
    }

    fn admin_subscriptions(&self, school_id: &str) -> Vec<SubscriptionConfig> {
        let school = eq("school_id", school_id);
        vec![
            subscription("students", EventFilter::All, school.clone(), &RowPayload::Redacted),
            subscription("attendance", EventFilter::All, school.clone(), &RowPayload::Redacted),
            subscription("announcements", EventFilter::All, school, &RowPayload::Redacted),
        ]
    }

    /// Membership filter, truncated to the first N ids at the backend cap
    ///
    /// Ids beyond the cap silently receive no realtime updates; the gap is
    /// logged, not split into a second subscription.
    fn in_filter(&self, field: &str, ids: &[String]) -> String {
        let cap = self.config.membership_filter_cap;
        let ids = if ids.len() > cap {
            warn!(
                field,
                dropped = ids.len() - cap,
                cap,
                "scope collection exceeds membership filter cap; truncating"
            );
            &ids[..cap]
        } else {
            ids
        };
        format!("{}=in.({})", field, ids.join(","))
    }
}

fn eq(field: &str, id: &str) -> String {
    format!("{}=eq.{}", field, id)
}

fn subscription(
    table: &str,
    event_filter: EventFilter,
    row_filter: String,
    payload: &RowPayload,
) -> SubscriptionConfig {
    SubscriptionConfig {
        table: table.to_string(),
        event_filter,
        row_filter: Some(row_filter),
        cache_keys: resolver::declared(table, payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ProfileBuilder {
        ProfileBuilder::new(RealtimeConfig::default())
    }

    fn student_scope() -> ScopeContext {
        ScopeContext::Student {
            student_id: "S1".to_string(),
            class_id: Some("C1".to_string()),
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = builder();
        let a = builder.build(&student_scope());
        let b = builder.build(&student_scope());
        assert_eq!(a.channel_name, b.channel_name);
        assert_eq!(a.subscriptions, b.subscriptions);
    }

    #[test]
    fn test_student_profile() {
        let profile = builder().build(&student_scope());

        assert_eq!(profile.channel_name, "student-S1");
        assert_eq!(profile.debounce_window, Duration::from_millis(300));
        assert_eq!(profile.subscriptions.len(), 6);

        let attendance = &profile.subscriptions[0];
        assert_eq!(attendance.table, "attendance");
        assert_eq!(attendance.row_filter.as_deref(), Some("student_id=eq.S1"));
        assert_eq!(
            attendance.cache_keys,
            vec![
                CacheKey::new(["attendance"]),
                CacheKey::new(["attendance-calendar", "S1"]),
                CacheKey::new(["attendance-rate", "S1"]),
                CacheKey::new(["student-dashboard", "S1"]),
            ]
        );
    }

    #[test]
    fn test_student_without_class_skips_class_tables() {
        let profile = builder().build(&ScopeContext::Student {
            student_id: "S1".to_string(),
            class_id: None,
        });

        assert_eq!(profile.subscriptions.len(), 4);
        assert!(profile
            .subscriptions
            .iter()
            .all(|sub| sub.table != "assignments" && sub.table != "announcements"));
    }

    #[test]
    fn test_teacher_with_no_classes_is_empty() {
        let profile = builder().build(&ScopeContext::Teacher {
            teacher_id: "T1".to_string(),
            school_id: "SCH1".to_string(),
            class_ids: Vec::new(),
        });

        assert_eq!(profile.channel_name, "teacher-T1");
        assert!(profile.is_empty());
        assert_eq!(profile.debounce_window, Duration::from_millis(500));
    }

    #[test]
    fn test_parent_with_no_children_is_empty() {
        let profile = builder().build(&ScopeContext::Parent {
            parent_id: "P1".to_string(),
            child_ids: Vec::new(),
        });

        assert_eq!(profile.channel_name, "parent-P1");
        assert!(profile.is_empty());
    }

    #[test]
    fn test_in_filter_truncates_at_cap() {
        let ids: Vec<String> = (0..150).map(|i| format!("C{}", i)).collect();
        let profile = builder().build(&ScopeContext::Teacher {
            teacher_id: "T1".to_string(),
            school_id: "SCH1".to_string(),
            class_ids: ids.clone(),
        });

        let filter = profile.subscriptions[0].row_filter.as_deref().unwrap();
        let expected = format!("class_id=in.({})", ids[..100].join(","));
        assert_eq!(filter, expected);
    }

    #[test]
    fn test_in_filter_under_cap_is_complete() {
        let ids = vec!["C1".to_string(), "C2".to_string()];
        let profile = builder().build(&ScopeContext::Teacher {
            teacher_id: "T1".to_string(),
            school_id: "SCH1".to_string(),
            class_ids: ids,
        });

        assert_eq!(
            profile.subscriptions[0].row_filter.as_deref(),
            Some("class_id=in.(C1,C2)")
        );
    }

    #[test]
    fn test_collection_profiles_declare_broad_keys() {
        let profile = builder().build(&ScopeContext::Parent {
            parent_id: "P1".to_string(),
            child_ids: vec!["S1".to_string(), "S2".to_string()],
        });

        let declared = profile.declared_keys();
        assert!(declared.contains(&CacheKey::new(["attendance"])));
        assert!(declared.contains(&CacheKey::new(["attendance-calendar"])));
        assert!(declared.contains(&CacheKey::new(["leaderboard"])));
    }

    #[test]
    fn test_declared_keys_are_unique() {
        let profile = builder().build(&student_scope());
        let declared = profile.declared_keys();

        let mut seen = std::collections::HashSet::new();
        for key in &declared {
            assert!(seen.insert(key.clone()), "duplicate declared key: {}", key);
        }
        // student-dashboard:S1 appears in several subscriptions but once here
        assert!(declared.contains(&CacheKey::new(["student-dashboard", "S1"])));
    }

    #[test]
    fn test_channel_names_unique_per_role_and_id() {
        let builder = builder();
        let student = builder.build(&student_scope());
        let admin = builder.build(&ScopeContext::Admin {
            school_id: "S1".to_string(),
        });
        // Same primary id, different role, different channel
        assert_ne!(student.channel_name, admin.channel_name);
    }
}
