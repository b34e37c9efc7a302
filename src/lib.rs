//! Client data synchronization layer for the MSTwins community app.
//!
//! This crate keeps a viewer's "who liked me", matches, and discover views
//! consistent across consumers without duplicate network fetches. Three
//! cooperating pieces do the work:
//!
//! - [`sync::cache::ViewCache`], a bounded, namespaced TTL cache for
//!   dashboard data,
//! - the optimized fetchers on [`sync::SyncEngine`] and
//!   [`sync::discover::DiscoverFeed`], set-subtraction queries that avoid
//!   hydrating profiles which would be filtered out anyway,
//! - [`sync::realtime::RealtimeSync`], a subscription to backend change
//!   events that invalidates the cache and broadcasts a typed
//!   [`sync::events::DataChanged`] notification.
//!
//! The backend itself (queries, mutations, realtime transport) is consumed
//! through the [`sync::backend::ProfileStore`] and
//! [`sync::realtime::ChangeFeed`] seams; this crate never talks to the wire
//! directly.

use std::sync::OnceLock;

pub mod sync;

pub use sync::backend::{ProfileStore, StoreError};
pub use sync::cache::{CachedView, DataKind, ViewCache};
pub use sync::discover::DiscoverFeed;
pub use sync::error::{Result, SyncError};
pub use sync::events::DataChanged;
pub use sync::models::{Like, Match, MemberId, ModerationStatus, Pass, Profile};
pub use sync::query::{OptimizedQuery, QueryOptions, QueryOutcome};
pub use sync::realtime::{ChangeFeed, ChannelState, FeedMessage};
pub use sync::{SyncConfig, SyncEngine};

/// Initializes the `tracing` subscriber for this process.
///
/// Filtering follows `RUST_LOG`, defaulting to `info` for this crate when
/// unset. Safe to call multiple times; only the first call has an effect.
pub fn init_tracing() {
    static TRACING_INIT: OnceLock<()> = OnceLock::new();
    TRACING_INIT.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mstwins_sync=info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}
