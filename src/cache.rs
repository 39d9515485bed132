//! # Query Cache Interface
//!
//! Cache keys and the consumed-side traits of the query-cache layer.
//!
//! The subsystem never reads cached data; it only invalidates it. Every
//! invalidation forces a full refetch of the affected view, so coalescing
//! and over-invalidation are always safe.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Hierarchical cache key: ordered segments, most general first
///
/// `["attendance"]` covers every attendance view; `["attendance-rate", "S1"]`
/// covers one student's rate widget.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    /// Build a key from its segments
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CacheKey(segments.into_iter().map(Into::into).collect())
    }

    /// Key segments in order
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(":"))
    }
}

/// Query cache consumed by the subsystem
pub trait QueryCache: Send + Sync {
    /// Invalidate every query under `key`, forcing a refetch
    fn invalidate_queries(&self, key: &CacheKey);

    /// Invalidate everything; used for broad catch-up after an
    /// arbitrarily long background period
    fn invalidate_all(&self);
}

/// Focus/online manager of the query layer
///
/// Marking the layer focused or online resumes refetches that were paused
/// while the app was backgrounded or offline.
pub trait FocusManager: Send + Sync {
    /// Mark the query layer focused or unfocused
    fn set_focused(&self, focused: bool);

    /// Mark the query layer online or offline
    fn set_online(&self, online: bool);
}

/// In-memory cache double that counts invalidations per key
///
/// Implements both consumed traits so tests and embedders can observe
/// exactly what the subsystem asked the query layer to do.
#[derive(Debug, Default)]
pub struct RecordingCache {
    counts: Mutex<HashMap<CacheKey, usize>>,
    all_count: AtomicUsize,
    focused: AtomicBool,
    online: AtomicBool,
}

impl RecordingCache {
    /// Create an empty recording cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of invalidations issued for `key`
    pub fn count(&self, key: &CacheKey) -> usize {
        self.counts
            .lock()
            .map(|counts| counts.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Total per-key invalidations issued
    pub fn total(&self) -> usize {
        self.counts
            .lock()
            .map(|counts| counts.values().sum())
            .unwrap_or(0)
    }

    /// Keys invalidated at least once, sorted
    pub fn invalidated_keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .counts
            .lock()
            .map(|counts| counts.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Number of invalidate-all sweeps issued
    pub fn all_count(&self) -> usize {
        self.all_count.load(Ordering::SeqCst)
    }

    /// Current focused flag
    pub fn focused(&self) -> bool {
        self.focused.load(Ordering::SeqCst)
    }

    /// Current online flag
    pub fn online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

impl QueryCache for RecordingCache {
    fn invalidate_queries(&self, key: &CacheKey) {
        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(key.clone()).or_insert(0) += 1;
        }
    }

    fn invalidate_all(&self) {
        self.all_count.fetch_add(1, Ordering::SeqCst);
    }
}

impl FocusManager for RecordingCache {
    fn set_focused(&self, focused: bool) {
        self.focused.store(focused, Ordering::SeqCst);
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}
