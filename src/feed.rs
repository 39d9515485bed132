//! # Change Feed
//!
//! Consumed transport abstraction: a reliable publish/subscribe channel is
//! assumed to exist. One logical channel multiplexes all of a session's
//! table-level listeners; the feed pushes [`ChannelMessage`] values onto a
//! single queue consumed by the channel's dispatcher task.
//!
//! [`InMemoryFeed`] is a complete in-process implementation used by the
//! integration tests and by embedders that source changes locally.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{RealtimeError, RealtimeResult};
use crate::event::{ChangeEvent, EventFilter};
use crate::profile::SubscriptionConfig;

/// Connection state of one logical channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    /// Connection setup in progress
    Connecting,
    /// Listeners active; events flowing
    Subscribed,
    /// Backend rejected or dropped the channel
    ChannelError,
    /// Subscription handshake timed out
    TimedOut,
    /// Channel closed
    Closed,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelState::Connecting => "CONNECTING",
            ChannelState::Subscribed => "SUBSCRIBED",
            ChannelState::ChannelError => "CHANNEL_ERROR",
            ChannelState::TimedOut => "TIMED_OUT",
            ChannelState::Closed => "CLOSED",
        };
        write!(f, "{}", s)
    }
}

/// One table-level listener registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Table to listen on
    pub table: String,
    /// Event types to receive
    pub event_filter: EventFilter,
    /// Backend row filter
    pub row_filter: Option<String>,
}

impl From<&SubscriptionConfig> for ListenerConfig {
    fn from(sub: &SubscriptionConfig) -> Self {
        Self {
            table: sub.table.clone(),
            event_filter: sub.event_filter,
            row_filter: sub.row_filter.clone(),
        }
    }
}

/// Message pushed onto a channel's dispatch queue
#[derive(Debug, Clone)]
pub enum ChannelMessage {
    /// A row change matched one of the channel's listeners
    Change(ChangeEvent),
    /// The channel's connection state changed
    Status(ChannelState),
}

/// One logical multiplexed channel on the feed
pub trait FeedChannel: Send + Sync {
    /// Channel name
    fn name(&self) -> String;

    /// Register a table-level listener delivering into `queue`
    fn on(&self, listener: ListenerConfig, queue: mpsc::UnboundedSender<ChannelMessage>);

    /// Start the subscription, delivering status transitions into `queue`
    fn subscribe(&self, queue: mpsc::UnboundedSender<ChannelMessage>);

    /// Current connection state; consulted by the resubscribe scan
    fn state(&self) -> ChannelState;

    /// Re-run the subscription handshake after an error or timeout
    fn resubscribe(&self);
}

/// The backing change-notification feed
pub trait ChangeFeed: Send + Sync {
    /// Get or create the channel registered under `name`
    fn channel(&self, name: &str) -> Arc<dyn FeedChannel>;

    /// Tear down the channel registered under `name`
    fn remove_channel(&self, name: &str);

    /// All registered channels, for the resubscribe scan
    fn channels(&self) -> Vec<Arc<dyn FeedChannel>>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

struct Listener {
    config: ListenerConfig,
    queue: mpsc::UnboundedSender<ChannelMessage>,
}

/// In-memory feed channel
pub struct InMemoryChannel {
    name: String,
    state: RwLock<ChannelState>,
    listeners: RwLock<Vec<Listener>>,
    status_queues: RwLock<Vec<mpsc::UnboundedSender<ChannelMessage>>>,
    subscribe_count: AtomicUsize,
}

impl InMemoryChannel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(ChannelState::Connecting),
            listeners: RwLock::new(Vec::new()),
            status_queues: RwLock::new(Vec::new()),
            subscribe_count: AtomicUsize::new(0),
        }
    }

    /// Number of subscribe/resubscribe handshakes performed
    pub fn subscribe_count(&self) -> usize {
        self.subscribe_count.load(Ordering::SeqCst)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    fn set_state(&self, state: ChannelState) {
        if let Ok(mut current) = self.state.write() {
            *current = state;
        }
        if let Ok(mut queues) = self.status_queues.write() {
            queues.retain(|queue| queue.send(ChannelMessage::Status(state)).is_ok());
        }
    }

    fn deliver(&self, event: &ChangeEvent) -> usize {
        let Ok(listeners) = self.listeners.read() else {
            return 0;
        };

        let mut delivered = 0;
        for listener in listeners.iter() {
            if listener.config.table != event.table {
                continue;
            }
            if !listener.config.event_filter.matches(event.event_type) {
                continue;
            }
            if let Some(filter) = &listener.config.row_filter {
                if !row_matches(filter, event) {
                    continue;
                }
            }
            if listener
                .queue
                .send(ChannelMessage::Change(event.clone()))
                .is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }
}

impl FeedChannel for InMemoryChannel {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn on(&self, listener: ListenerConfig, queue: mpsc::UnboundedSender<ChannelMessage>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(Listener {
                config: listener,
                queue,
            });
        }
    }

    fn subscribe(&self, queue: mpsc::UnboundedSender<ChannelMessage>) {
        if let Ok(mut queues) = self.status_queues.write() {
            queues.push(queue);
        }
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
    }

    fn state(&self) -> ChannelState {
        self.state
            .read()
            .map(|state| *state)
            .unwrap_or(ChannelState::Closed)
    }

    fn resubscribe(&self) {
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        self.set_state(ChannelState::Subscribed);
    }
}

/// In-process change feed
#[derive(Clone, Default)]
pub struct InMemoryFeed {
    channels: Arc<RwLock<HashMap<String, Arc<InMemoryChannel>>>>,
}

impl InMemoryFeed {
    /// Create an empty feed
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a change to every matching listener on every channel
    ///
    /// Returns the number of deliveries.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let channels: Vec<Arc<InMemoryChannel>> = self
            .channels
            .read()
            .map(|channels| channels.values().cloned().collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for channel in channels {
            delivered += channel.deliver(event);
        }
        debug!(table = %event.table, event_type = %event.event_type, delivered, "published change");
        delivered
    }

    /// Drive a channel's connection state, notifying status subscribers
    pub fn set_state(&self, name: &str, state: ChannelState) -> RealtimeResult<()> {
        let channel = self
            .channels
            .read()
            .map_err(|_| RealtimeError::Internal("channel registry lock poisoned".to_string()))?
            .get(name)
            .cloned()
            .ok_or_else(|| RealtimeError::ChannelNotFound(name.to_string()))?;
        channel.set_state(state);
        Ok(())
    }

    /// Look up a channel by name without creating it
    pub fn get(&self, name: &str) -> Option<Arc<InMemoryChannel>> {
        self.channels
            .read()
            .ok()
            .and_then(|channels| channels.get(name).cloned())
    }

    /// Names of all registered channels
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .read()
            .map(|channels| channels.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl ChangeFeed for InMemoryFeed {
    fn channel(&self, name: &str) -> Arc<dyn FeedChannel> {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        let channel = Arc::new(InMemoryChannel::new(name));
        if let Ok(mut channels) = self.channels.write() {
            channels.insert(name.to_string(), channel.clone());
        }
        channel
    }

    fn remove_channel(&self, name: &str) {
        if let Ok(mut channels) = self.channels.write() {
            channels.remove(name);
        }
    }

    fn channels(&self) -> Vec<Arc<dyn FeedChannel>> {
        self.channels
            .read()
            .map(|channels| {
                channels
                    .values()
                    .map(|channel| channel.clone() as Arc<dyn FeedChannel>)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Evaluate a `field=eq.value` / `field=in.(a,b)` filter against an event
///
/// Advisory only: the real backend filters on the unredacted row, so a row
/// whose filter field was redacted is still delivered.
fn row_matches(filter: &str, event: &ChangeEvent) -> bool {
    let Some((field, predicate)) = filter.split_once('=') else {
        return true;
    };

    let row = event.new_row.as_ref().or(event.old_row.as_ref());
    let value = match row.and_then(|row| row.get(field)) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        // Field redacted or absent: the backend already matched server-side
        _ => return true,
    };

    if let Some(expected) = predicate.strip_prefix("eq.") {
        value == expected
    } else if let Some(list) = predicate.strip_prefix("in.") {
        list.trim_start_matches('(')
            .trim_end_matches(')')
            .split(',')
            .any(|candidate| candidate.trim() == value)
    } else {
        true
    }
}
