//! # Realtime Manager
//!
//! Session-level orchestrator: resolves the scope context, builds the
//! subscription profile, and swaps the channel when the profile changes.
//!
//! Scope resolution failure disables realtime sync for the session; it
//! never propagates. The UI keeps working off manual refetches until a
//! later `sync_session` call succeeds.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::QueryCache;
use crate::channel::{Channel, ConnectionStatus};
use crate::clock::Clock;
use crate::error::RealtimeResult;
use crate::feed::ChangeFeed;
use crate::mutation::MutationTracker;
use crate::profile::{ProfileBuilder, Role, ScopeContext};

/// Resolves the scope context for a `(user id, role)` pair
///
/// Typically a one-time lookup against the session's role rows; the
/// manager caches the result until the role or session changes.
pub trait ScopeResolver: Send + Sync {
    /// Resolve the identifier set the session is expected to observe
    fn resolve(&self, user_id: &str, role: Role) -> RealtimeResult<ScopeContext>;
}

/// Orchestrates realtime sync for one authenticated session
pub struct RealtimeManager {
    resolver: Arc<dyn ScopeResolver>,
    builder: ProfileBuilder,
    feed: Arc<dyn ChangeFeed>,
    cache: Arc<dyn QueryCache>,
    mutations: Arc<MutationTracker>,
    clock: Arc<dyn Clock>,
    session_id: Uuid,
    cached_scope: Option<(String, Role, ScopeContext)>,
    channel: Option<Channel>,
}

impl RealtimeManager {
    /// Create a manager for a new session
    pub fn new(
        resolver: Arc<dyn ScopeResolver>,
        builder: ProfileBuilder,
        feed: Arc<dyn ChangeFeed>,
        cache: Arc<dyn QueryCache>,
        mutations: Arc<MutationTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            builder,
            feed,
            cache,
            mutations,
            clock,
            session_id: Uuid::new_v4(),
            cached_scope: None,
            channel: None,
        }
    }

    /// Session identity
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Tracker that domain write operations record successful mutations on
    pub fn mutations(&self) -> Arc<MutationTracker> {
        self.mutations.clone()
    }

    /// True while a channel is open for this session
    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    /// Connection status of the current channel, or the disconnected
    /// default when none is open
    pub fn connection_status(&self) -> ConnectionStatus {
        self.channel
            .as_ref()
            .map(Channel::status)
            .unwrap_or_default()
    }

    /// Bring the channel in line with the session's current scope
    ///
    /// Resolves the scope (cached until role or session changes), builds
    /// the profile, and tears down/re-creates the channel when the channel
    /// name or subscription count changed. Safe to call on every auth or
    /// scope transition.
    pub async fn sync_session(&mut self, user_id: &str, role: Role) {
        let Some(scope) = self.scope_for(user_id, role) else {
            // Sync stays disabled until the scope resolves
            self.teardown().await;
            return;
        };

        let profile = self.builder.build(&scope);
        let needs_swap = match &self.channel {
            Some(channel) => {
                channel.name() != profile.channel_name
                    || channel.profile().subscriptions.len() != profile.subscriptions.len()
            }
            None => !profile.is_empty(),
        };
        if !needs_swap {
            debug!(channel = %profile.channel_name, "profile unchanged; keeping channel");
            return;
        }

        // Old channel fully down (debouncer cancelled, listeners gone)
        // before the replacement opens
        self.teardown().await;
        self.channel = Channel::open(
            profile,
            self.feed.clone(),
            self.cache.clone(),
            self.mutations.clone(),
            self.clock.clone(),
        );
    }

    /// Re-resolve the scope on the next `sync_session`, e.g. after a class
    /// reassignment that the cached scope would hide
    pub fn invalidate_scope(&mut self) {
        self.cached_scope = None;
    }

    /// Close the current channel, if any
    pub async fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
    }

    /// End the session: close the channel, drop the cached scope, dispose
    /// the mutation tracker
    pub async fn end_session(&mut self) {
        self.teardown().await;
        self.cached_scope = None;
        self.mutations.dispose();
        info!(session = %self.session_id, "realtime session ended");
    }

    fn scope_for(&mut self, user_id: &str, role: Role) -> Option<ScopeContext> {
        if let Some((cached_user, cached_role, scope)) = &self.cached_scope {
            if cached_user == user_id && *cached_role == role {
                return Some(scope.clone());
            }
        }

        match self.resolver.resolve(user_id, role) {
            Ok(scope) => {
                self.cached_scope = Some((user_id.to_string(), role, scope.clone()));
                Some(scope)
            }
            Err(err) => {
                warn!(user_id, %role, error = %err, "scope resolution failed; realtime sync disabled");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RecordingCache;
    use crate::clock::SystemClock;
    use crate::config::RealtimeConfig;
    use crate::error::RealtimeError;
    use crate::feed::InMemoryFeed;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubResolver {
        scopes: Mutex<std::collections::HashMap<(String, Role), ScopeContext>>,
        calls: AtomicUsize,
    }

    impl StubResolver {
        fn new() -> Self {
            Self {
                scopes: Mutex::new(std::collections::HashMap::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn insert(&self, user_id: &str, role: Role, scope: ScopeContext) {
            self.scopes
                .lock()
                .unwrap()
                .insert((user_id.to_string(), role), scope);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ScopeResolver for StubResolver {
        fn resolve(&self, user_id: &str, role: Role) -> RealtimeResult<ScopeContext> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.scopes
                .lock()
                .unwrap()
                .get(&(user_id.to_string(), role))
                .cloned()
                .ok_or_else(|| RealtimeError::ScopeUnavailable {
                    user_id: user_id.to_string(),
                    reason: "no role row".to_string(),
                })
        }
    }

    fn manager(resolver: Arc<StubResolver>) -> (RealtimeManager, InMemoryFeed) {
        let feed = InMemoryFeed::new();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let config = RealtimeConfig::default();
        let manager = RealtimeManager::new(
            resolver,
            ProfileBuilder::new(config.clone()),
            Arc::new(feed.clone()),
            Arc::new(RecordingCache::new()),
            Arc::new(MutationTracker::new(&config, clock.clone())),
            clock,
        );
        (manager, feed)
    }

    fn student_scope(id: &str) -> ScopeContext {
        ScopeContext::Student {
            student_id: id.to_string(),
            class_id: None,
        }
    }

    #[tokio::test]
    async fn test_sync_opens_channel() {
        let resolver = Arc::new(StubResolver::new());
        resolver.insert("U1", Role::Student, student_scope("S1"));
        let (mut manager, feed) = manager(resolver);

        manager.sync_session("U1", Role::Student).await;

        assert!(manager.has_channel());
        assert_eq!(feed.channel_names(), ["student-S1"]);
        assert!(!manager.connection_status().is_connected);

        manager.end_session().await;
        assert!(feed.channel_names().is_empty());
    }

    #[tokio::test]
    async fn test_resolution_failure_disables_sync() {
        let resolver = Arc::new(StubResolver::new());
        let (mut manager, feed) = manager(resolver);

        manager.sync_session("U1", Role::Student).await;

        assert!(!manager.has_channel());
        assert!(feed.channel_names().is_empty());
        assert!(!manager.connection_status().is_connected);
    }

    #[tokio::test]
    async fn test_scope_cached_until_role_changes() {
        let resolver = Arc::new(StubResolver::new());
        resolver.insert("U1", Role::Student, student_scope("S1"));
        resolver.insert(
            "U1",
            Role::Admin,
            ScopeContext::Admin {
                school_id: "SCH1".to_string(),
            },
        );
        let (mut manager, _feed) = manager(resolver.clone());

        manager.sync_session("U1", Role::Student).await;
        manager.sync_session("U1", Role::Student).await;
        manager.sync_session("U1", Role::Student).await;
        assert_eq!(resolver.calls(), 1);

        manager.sync_session("U1", Role::Admin).await;
        assert_eq!(resolver.calls(), 2);

        manager.end_session().await;
    }

    #[tokio::test]
    async fn test_role_switch_swaps_channel() {
        let resolver = Arc::new(StubResolver::new());
        resolver.insert("U1", Role::Student, student_scope("S1"));
        resolver.insert(
            "U1",
            Role::Admin,
            ScopeContext::Admin {
                school_id: "SCH1".to_string(),
            },
        );
        let (mut manager, feed) = manager(resolver);

        manager.sync_session("U1", Role::Student).await;
        assert_eq!(feed.channel_names(), ["student-S1"]);

        manager.sync_session("U1", Role::Admin).await;
        assert_eq!(feed.channel_names(), ["admin-SCH1"]);

        manager.end_session().await;
    }

    #[tokio::test]
    async fn test_empty_profile_never_opens_channel() {
        let resolver = Arc::new(StubResolver::new());
        resolver.insert(
            "U1",
            Role::Teacher,
            ScopeContext::Teacher {
                teacher_id: "T1".to_string(),
                school_id: "SCH1".to_string(),
                class_ids: Vec::new(),
            },
        );
        let (mut manager, feed) = manager(resolver);

        manager.sync_session("U1", Role::Teacher).await;
        manager.sync_session("U1", Role::Teacher).await;

        assert!(!manager.has_channel());
        assert!(feed.channel_names().is_empty());
        assert!(!manager.connection_status().is_connected);
    }

    #[tokio::test]
    async fn test_scope_invalidation_triggers_rebuild() {
        let resolver = Arc::new(StubResolver::new());
        resolver.insert(
            "U1",
            Role::Teacher,
            ScopeContext::Teacher {
                teacher_id: "T1".to_string(),
                school_id: "SCH1".to_string(),
                class_ids: vec!["C1".to_string()],
            },
        );
        let (mut manager, feed) = manager(resolver.clone());

        manager.sync_session("U1", Role::Teacher).await;
        assert_eq!(feed.channel_names(), ["teacher-T1"]);
        let listeners_before = feed.get("teacher-T1").unwrap().listener_count();

        // Class reassignment lands in the backend; cached scope hides it
        resolver.insert(
            "U1",
            Role::Teacher,
            ScopeContext::Teacher {
                teacher_id: "T1".to_string(),
                school_id: "SCH1".to_string(),
                class_ids: Vec::new(),
            },
        );
        manager.sync_session("U1", Role::Teacher).await;
        assert_eq!(feed.get("teacher-T1").unwrap().listener_count(), listeners_before);

        manager.invalidate_scope();
        manager.sync_session("U1", Role::Teacher).await;

        // Empty class list now: channel torn down, none reopened
        assert!(!manager.has_channel());
        assert!(feed.channel_names().is_empty());
    }
}
