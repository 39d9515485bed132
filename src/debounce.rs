//! # Debounced Invalidator
//!
//! Trailing-edge coalescing of cache invalidations.
//!
//! Bursts of change events within one window collapse into a single flush
//! of the unique pending keys. The window restarts on every call, so a
//! sustained burst flushes once after it quiets down. Safe because
//! invalidation forces a full refetch; coalesced keys need no sequencing.
//!
//! The invalidator is an explicit `{Idle, Pending(deadline)}` state machine
//! over an injected clock. It is owned by a single dispatcher task, which
//! polls it whenever the deadline elapses; no locking is involved.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::cache::{CacheKey, QueryCache};
use crate::clock::Clock;

/// Debounce timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    /// No pending keys
    Idle,
    /// Keys pending; flush at the deadline unless restarted first
    Pending(Instant),
}

/// Coalesces invalidation requests into per-window flushes
pub struct DebouncedInvalidator {
    pending: HashSet<CacheKey>,
    state: DebounceState,
    window: Duration,
    cache: Arc<dyn QueryCache>,
    clock: Arc<dyn Clock>,
}

impl DebouncedInvalidator {
    /// Create an idle invalidator with the given window
    pub fn new(window: Duration, cache: Arc<dyn QueryCache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pending: HashSet::new(),
            state: DebounceState::Idle,
            window,
            cache,
            clock,
        }
    }

    /// Merge `keys` into the pending set and restart the window
    pub fn invalidate<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = CacheKey>,
    {
        let before = self.pending.len();
        self.pending.extend(keys);
        if self.pending.is_empty() {
            return;
        }

        // Trailing edge: every call restarts the window, even when the
        // keys were already pending
        self.state = DebounceState::Pending(self.clock.now() + self.window);

        if self.pending.len() > before {
            debug!(
                pending = self.pending.len(),
                window_ms = self.window.as_millis() as u64,
                "invalidation window restarted"
            );
        }
    }

    /// Deadline of the pending window, if any
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Idle => None,
            DebounceState::Pending(deadline) => Some(deadline),
        }
    }

    /// Number of distinct keys awaiting flush
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Flush if the deadline has elapsed; returns the number of keys flushed
    pub fn poll(&mut self, now: Instant) -> usize {
        match self.state {
            DebounceState::Pending(deadline) if now >= deadline => self.flush(),
            _ => 0,
        }
    }

    /// Cancel the window and drop pending keys; idempotent
    pub fn cleanup(&mut self) {
        self.pending.clear();
        self.state = DebounceState::Idle;
    }

    fn flush(&mut self) -> usize {
        let flushed = self.pending.len();
        for key in self.pending.drain() {
            self.cache.invalidate_queries(&key);
        }
        self.state = DebounceState::Idle;
        debug!(flushed, "invalidations flushed");
        flushed
    }
}

impl std::fmt::Debug for DebouncedInvalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedInvalidator")
            .field("pending", &self.pending.len())
            .field("state", &self.state)
            .field("window", &self.window)
            .finish()
    }
}
