//! # Mutation Tracker
//!
//! Record of recently-completed local writes, used to suppress the
//! realtime echo of this session's own mutations.
//!
//! A locally-initiated write already updates the cache optimistically; the
//! change notification it produces must not trigger a redundant, possibly
//! stale-overwriting refetch. Domain write operations call [`record`] at
//! success time; the event router checks [`is_duplicate`] before resolving
//! cache keys.
//!
//! Entries are bounded by continuous pruning: every `is_duplicate` call
//! drops entries older than the max age, so no background sweep is needed.
//!
//! [`record`]: MutationTracker::record
//! [`is_duplicate`]: MutationTracker::is_duplicate

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::clock::Clock;
use crate::config::RealtimeConfig;

/// Tracks recent local writes per `(table, record id)` pair
///
/// One tracker per session, constructed at session start and disposed at
/// logout; never shared across sessions.
pub struct MutationTracker {
    entries: Mutex<HashMap<(String, String), Instant>>,
    dedup_window: Duration,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl MutationTracker {
    /// Create a tracker with the configured windows
    pub fn new(config: &RealtimeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            dedup_window: config.dedup_window(),
            max_age: config.mutation_max_age(),
            clock,
        }
    }

    /// Record a successful local write against `(table, id)`
    ///
    /// A repeated write to the same record restarts its dedup window.
    pub fn record(&self, table: &str, id: &str) {
        let now = self.clock.now();
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert((table.to_string(), id.to_string()), now);
        }
    }

    /// True iff `(table, id)` was written locally within the dedup window
    ///
    /// Prunes expired entries opportunistically before the check.
    pub fn is_duplicate(&self, table: &str, id: &str) -> bool {
        let now = self.clock.now();
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };

        entries.retain(|_, written_at| now.duration_since(*written_at) <= self.max_age);

        entries
            .get(&(table.to_string(), id.to_string()))
            .map(|written_at| now.duration_since(*written_at) < self.dedup_window)
            .unwrap_or(false)
    }

    /// Number of tracked entries
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Check if the tracker holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries; called at session end
    pub fn dispose(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl std::fmt::Debug for MutationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationTracker")
            .field("len", &self.len())
            .field("dedup_window", &self.dedup_window)
            .field("max_age", &self.max_age)
            .finish()
    }
}
