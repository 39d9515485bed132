//! # Connection Lifecycle
//!
//! Reacts to app foreground/background transitions and network
//! connectivity changes.
//!
//! Degraded channels are never retried in place; they wait for the next
//! foreground transition, which resubscribes every channel not in
//! `SUBSCRIBED` and issues a broad invalidate-all. Over-invalidation after
//! an arbitrarily long background period is cheaper than a missed update.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cache::{FocusManager, QueryCache};
use crate::feed::{ChangeFeed, ChannelState};

/// External signal driving the lifecycle manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// App came to the foreground
    Foregrounded,
    /// App went to the background
    Backgrounded,
    /// Connectivity probe fired; `None` means the probe is unavailable
    ConnectivityChanged(Option<bool>),
    /// Session ending; detach from both signals
    Shutdown,
}

/// Drives resubscription and catch-up from app/network transitions
pub struct LifecycleManager {
    feed: Arc<dyn ChangeFeed>,
    cache: Arc<dyn QueryCache>,
    focus: Arc<dyn FocusManager>,
    active: bool,
}

impl LifecycleManager {
    /// Create a manager observing the given feed and cache
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        cache: Arc<dyn QueryCache>,
        focus: Arc<dyn FocusManager>,
    ) -> Self {
        Self {
            feed,
            cache,
            focus,
            active: true,
        }
    }

    /// Dispatch one lifecycle event
    pub fn handle(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Foregrounded => self.on_foreground(),
            LifecycleEvent::Backgrounded => self.on_background(),
            LifecycleEvent::ConnectivityChanged(online) => self.on_connectivity(online),
            LifecycleEvent::Shutdown => self.shutdown(),
        }
    }

    /// Foreground transition: focus the query layer, resubscribe degraded
    /// channels, and issue a broad catch-up
    pub fn on_foreground(&mut self) {
        if !self.active {
            return;
        }
        self.focus.set_focused(true);

        let mut resubscribed = 0;
        for channel in self.feed.channels() {
            if channel.state() != ChannelState::Subscribed {
                channel.resubscribe();
                resubscribed += 1;
            }
        }

        // Arbitrary time may have passed; refetch everything rather than
        // trust what was cached before backgrounding
        self.cache.invalidate_all();
        info!(resubscribed, "foreground reconnect scan complete");
    }

    /// Background transition: unfocus the query layer
    pub fn on_background(&mut self) {
        if !self.active {
            return;
        }
        self.focus.set_focused(false);
        debug!("query layer unfocused");
    }

    /// Connectivity transition; an unavailable probe counts as online so
    /// paused refetches are never wedged on a missing signal
    pub fn on_connectivity(&mut self, online: Option<bool>) {
        if !self.active {
            return;
        }
        self.focus.set_online(online.unwrap_or(true));
    }

    /// Detach from both signals; idempotent
    pub fn shutdown(&mut self) {
        self.active = false;
    }

    /// Consume lifecycle events until the queue closes or `Shutdown`
    /// arrives
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<LifecycleEvent>) {
        while let Some(event) = events.recv().await {
            let stop = event == LifecycleEvent::Shutdown;
            self.handle(event);
            if stop {
                break;
            }
        }
    }
}
