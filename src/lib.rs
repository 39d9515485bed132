//! realsync - client-side realtime cache coherence
//!
//! Keeps a derived query cache consistent with a remote store that
//! delivers row-change notifications over a persistent connection.
//!
//! ## Architecture
//!
//! - **Profile** (pure): role + scope identifiers → subscription profile
//! - **Channel**: one multiplexed connection per profile, single
//!   dispatcher task per channel
//! - **Resolver** (pure): change event → cache keys, broad fallback when
//!   row-level security redacted the payload
//! - **Debounce**: trailing-edge coalescing of invalidation bursts
//! - **Mutation**: suppression of this session's own write echoes
//! - **Lifecycle**: foreground/connectivity driven resubscription and
//!   catch-up
//! - **Manager**: per-session orchestration
//!
//! The subsystem never merges deltas: every invalidation forces a full
//! refetch of the affected views, which is why coalescing, the broad
//! fallback and catch-up over-invalidation are all safe.

pub mod cache;
pub mod channel;
pub mod clock;
pub mod config;
pub mod debounce;
pub mod error;
pub mod event;
pub mod feed;
pub mod lifecycle;
pub mod manager;
pub mod mutation;
pub mod profile;
pub mod resolver;

pub use cache::{CacheKey, FocusManager, QueryCache, RecordingCache};
pub use channel::{Channel, ConnectionStatus, StatusHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RealtimeConfig;
pub use debounce::{DebounceState, DebouncedInvalidator};
pub use error::{RealtimeError, RealtimeResult};
pub use event::{ChangeEvent, EventFilter, EventType, RowPayload};
pub use feed::{
    ChangeFeed, ChannelMessage, ChannelState, FeedChannel, InMemoryFeed, ListenerConfig,
};
pub use lifecycle::{LifecycleEvent, LifecycleManager};
pub use manager::{RealtimeManager, ScopeResolver};
pub use mutation::MutationTracker;
pub use profile::{ProfileBuilder, Role, RoleSubscriptionProfile, ScopeContext, SubscriptionConfig};
