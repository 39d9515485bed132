//! # Channel / Event Router
//!
//! One logical connection per profile, one listener per subscription, one
//! dispatcher task per channel.
//!
//! The dispatcher consumes a single queue of change events and status
//! transitions, so event handling runs to completion before the next
//! message is processed: the pending-key set, the debounce state machine
//! and the mutation map need no locking. The only suspension point is the
//! debounce deadline.
//!
//! On entering `SUBSCRIBED` the router issues one catch-up invalidation of
//! every cache key declared in the profile, covering events missed during
//! connection setup. `CHANNEL_ERROR` and `TIMED_OUT` are recorded into the
//! connection status but not retried here; the next foreground scan
//! resubscribes (see `lifecycle`).

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::QueryCache;
use crate::clock::Clock;
use crate::debounce::DebouncedInvalidator;
use crate::event::{ChangeEvent, RowPayload};
use crate::feed::{ChangeFeed, ChannelMessage, ChannelState, ListenerConfig};
use crate::mutation::MutationTracker;
use crate::profile::RoleSubscriptionProfile;
use crate::resolver;

/// Connection status exposed to UI indicators
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStatus {
    /// True while the channel is in `SUBSCRIBED`
    pub is_connected: bool,

    /// Last error state observed, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Wall-clock time of the last processed event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Cloneable read handle on a channel's connection status
#[derive(Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<ConnectionStatus>>,
}

impl StatusHandle {
    /// Snapshot of the current status
    pub fn get(&self) -> ConnectionStatus {
        self.inner
            .read()
            .map(|status| status.clone())
            .unwrap_or_default()
    }

    fn update(&self, apply: impl FnOnce(&mut ConnectionStatus)) {
        if let Ok(mut status) = self.inner.write() {
            apply(&mut status);
        }
    }
}

/// An open channel: listeners registered, dispatcher task running
pub struct Channel {
    profile: RoleSubscriptionProfile,
    status: StatusHandle,
    feed: Arc<dyn ChangeFeed>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Channel {
    /// Open a channel for `profile`
    ///
    /// Returns `None` for a profile with zero subscriptions: such a
    /// profile never opens a network channel.
    pub fn open(
        profile: RoleSubscriptionProfile,
        feed: Arc<dyn ChangeFeed>,
        cache: Arc<dyn QueryCache>,
        mutations: Arc<MutationTracker>,
        clock: Arc<dyn Clock>,
    ) -> Option<Self> {
        if profile.is_empty() {
            debug!(channel = %profile.channel_name, "profile has no subscriptions; not opening");
            return None;
        }

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let feed_channel = feed.channel(&profile.channel_name);
        for sub in &profile.subscriptions {
            feed_channel.on(ListenerConfig::from(sub), queue_tx.clone());
        }
        feed_channel.subscribe(queue_tx);

        info!(
            channel = %profile.channel_name,
            listeners = profile.subscriptions.len(),
            "channel opened"
        );

        let status = StatusHandle::default();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let router = EventRouter {
            debouncer: DebouncedInvalidator::new(profile.debounce_window, cache, clock.clone()),
            profile: profile.clone(),
            status: status.clone(),
            mutations,
            clock,
        };
        let task = tokio::spawn(router.run(queue_rx, shutdown_rx));

        Some(Self {
            profile,
            status,
            feed,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.profile.channel_name
    }

    /// The profile this channel was opened for
    pub fn profile(&self) -> &RoleSubscriptionProfile {
        &self.profile
    }

    /// Handle for observing connection status
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Current connection status snapshot
    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    /// Tear the channel down
    ///
    /// Cancels the debouncer and stops the dispatcher before deregistering
    /// from the feed: once `close` returns, no invalidation from this
    /// channel can fire.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.feed.remove_channel(&self.profile.channel_name);
        self.status.update(|status| status.is_connected = false);
        info!(channel = %self.profile.channel_name, "channel closed");
    }
}

struct EventRouter {
    profile: RoleSubscriptionProfile,
    status: StatusHandle,
    debouncer: DebouncedInvalidator,
    mutations: Arc<MutationTracker>,
    clock: Arc<dyn Clock>,
}

impl EventRouter {
    async fn run(
        mut self,
        mut queue: mpsc::UnboundedReceiver<ChannelMessage>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            let deadline = self.debouncer.deadline();
            tokio::select! {
                _ = &mut shutdown => break,
                message = queue.recv() => match message {
                    Some(ChannelMessage::Change(event)) => self.handle_event(event),
                    Some(ChannelMessage::Status(state)) => self.handle_status(state),
                    None => break,
                },
                _ = sleep_until(deadline), if deadline.is_some() => {
                    self.debouncer.poll(self.clock.now());
                }
            }
        }
        // Pending keys die with the channel; the replacement profile's
        // catch-up invalidation covers anything they would have refetched
        self.debouncer.cleanup();
    }

    fn handle_event(&mut self, event: ChangeEvent) {
        if let Some(record_id) = event.record_id() {
            if self.mutations.is_duplicate(&event.table, &record_id) {
                // Echo of this session's own write; the cache was already
                // updated optimistically
                debug!(table = %event.table, record_id = %record_id, "discarded own-write echo");
                return;
            }
        }

        let payload = match resolver::scope_field(&event.table) {
            Some(field) => event.scope_payload(field),
            None => RowPayload::Redacted,
        };
        let keys = resolver::resolve(&event.table, event.event_type, &payload);
        if !keys.is_empty() {
            self.debouncer.invalidate(keys);
        }

        self.status
            .update(|status| status.last_event_at = Some(Utc::now()));
    }

    fn handle_status(&mut self, state: ChannelState) {
        match state {
            ChannelState::Subscribed => {
                self.status.update(|status| {
                    status.is_connected = true;
                    status.last_error = None;
                });
                // Catch-up: events may have been missed during setup
                let declared = self.profile.declared_keys();
                info!(
                    channel = %self.profile.channel_name,
                    keys = declared.len(),
                    "subscribed; issuing catch-up invalidation"
                );
                self.debouncer.invalidate(declared);
            }
            ChannelState::ChannelError | ChannelState::TimedOut => {
                // Recorded but not retried here; resubscription happens on
                // the next foreground scan to avoid retry storms
                warn!(channel = %self.profile.channel_name, state = %state, "channel degraded");
                self.status.update(|status| {
                    status.is_connected = false;
                    status.last_error = Some(state.to_string());
                });
            }
            ChannelState::Closed => {
                self.status.update(|status| status.is_connected = false);
            }
            ChannelState::Connecting => {}
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
