//! # Realtime Configuration
//!
//! Tuning knobs for the cache-coherence subsystem.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the realtime subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Window during which a notification matching a local write is
    /// suppressed as an echo, in milliseconds
    pub dedup_window_ms: u64,

    /// Mutation records older than this are pruned, in milliseconds
    pub mutation_max_age_ms: u64,

    /// Backend cap on membership ("IN") filter size; longer scope
    /// collections are truncated to the first N ids
    pub membership_filter_cap: usize,

    /// Debounce window for latency-sensitive single-user profiles,
    /// in milliseconds
    pub interactive_debounce_ms: u64,

    /// Debounce window for dashboard/aggregate profiles, in milliseconds
    pub dashboard_debounce_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 2000,
            mutation_max_age_ms: 5000,
            membership_filter_cap: 100,
            interactive_debounce_ms: 300,
            dashboard_debounce_ms: 500,
        }
    }
}

impl RealtimeConfig {
    /// Dedup window as a duration
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    /// Mutation max age as a duration
    pub fn mutation_max_age(&self) -> Duration {
        Duration::from_millis(self.mutation_max_age_ms)
    }

    /// Debounce window for latency-sensitive profiles
    pub fn interactive_debounce(&self) -> Duration {
        Duration::from_millis(self.interactive_debounce_ms)
    }

    /// Debounce window for dashboard profiles
    pub fn dashboard_debounce(&self) -> Duration {
        Duration::from_millis(self.dashboard_debounce_ms)
    }
}
