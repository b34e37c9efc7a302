//! The client data synchronization engine.
//!
//! [`SyncEngine`] owns the view cache, the typed change bus, and the
//! per-viewer realtime channels, and exposes the optimized read paths the
//! dashboard surfaces consume. It is constructed with its backend seams
//! injected, so tests and alternative transports swap in without touching
//! any global state.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;

pub mod backend;
pub mod cache;
pub mod discover;
pub mod error;
pub mod events;
mod likes;
pub mod models;
pub mod query;
pub mod realtime;
mod scheduler;

use backend::ProfileStore;
use cache::{DataKind, ViewCache};
use discover::DiscoverFeed;
use error::Result;
use events::{ChangeBus, DataChanged};
use models::{Like, MemberId, Pass};
use query::QueryOptions;
use realtime::{ChangeFeed, ChannelState, RealtimeSync};

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Lifetime of a cached view before reads treat it as a miss.
    pub cache_ttl: Duration,

    /// Upper bound on cached views; the oldest entry is evicted at capacity.
    pub cache_max_entries: usize,

    /// Profiles fetched per discover page.
    pub discover_page_size: usize,

    /// Total attempts per wrapped query execution.
    pub retry: u32,

    /// Base unit of the linear retry backoff.
    pub retry_delay: Duration,

    /// Cadence of the periodic view refresh for active viewers.
    pub refresh_interval: Duration,

    /// Cadence of the expired cache entry sweep.
    pub sweep_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5 * 60),
            cache_max_entries: cache::DEFAULT_MAX_ENTRIES,
            discover_page_size: discover::DEFAULT_PAGE_SIZE,
            retry: 3,
            retry_delay: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(90),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

pub struct SyncEngine {
    config: SyncConfig,
    store: Arc<dyn ProfileStore>,
    feed: Arc<dyn ChangeFeed>,
    cache: Arc<ViewCache>,
    bus: Arc<ChangeBus>,
    fetch_guards: DashMap<(MemberId, DataKind), Arc<Mutex<()>>>,
    channels: DashMap<MemberId, RealtimeSync>,
    scheduler_shutdown: watch::Sender<bool>,
    scheduler_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn ProfileStore>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Arc<Self> {
        let cache = Arc::new(ViewCache::new(config.cache_ttl, config.cache_max_entries));
        let (scheduler_shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            store,
            feed,
            cache,
            bus: Arc::new(ChangeBus::new()),
            fetch_guards: DashMap::new(),
            channels: DashMap::new(),
            scheduler_shutdown,
            scheduler_handles: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ViewCache> {
        &self.cache
    }

    /// Query options derived from the engine configuration, for callers
    /// wrapping their own fetches in an [`query::OptimizedQuery`].
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            cache_time: self.config.cache_ttl,
            retry: self.config.retry,
            retry_delay: self.config.retry_delay,
            ..QueryOptions::default()
        }
    }

    /// Subscribes to stale-view notifications for one viewer.
    pub fn subscribe_changes(&self, viewer: &MemberId) -> broadcast::Receiver<DataChanged> {
        self.bus.subscribe(viewer)
    }

    /// A fresh discover browsing session for `viewer`.
    pub fn discover_feed(&self, viewer: &MemberId) -> DiscoverFeed {
        DiscoverFeed::new(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            viewer.clone(),
            self.config.discover_page_size,
        )
    }

    /// Opens the realtime channel for `viewer`. A no-op while an existing
    /// channel is still subscribed; a dead channel is replaced.
    pub async fn connect(&self, viewer: &MemberId) -> Result<()> {
        if self.channel_state(viewer) == ChannelState::Subscribed {
            tracing::debug!(
                target: "mstwins_sync::engine",
                viewer = %viewer,
                "realtime channel already subscribed"
            );
            return Ok(());
        }

        let rx = self.feed.subscribe(viewer).await?;
        let channel = RealtimeSync::start(
            viewer.clone(),
            rx,
            Arc::clone(&self.cache),
            Arc::clone(&self.bus),
        );
        if let Some(previous) = self.channels.insert(viewer.clone(), channel) {
            previous.stop().await;
        }
        tracing::info!(
            target: "mstwins_sync::engine",
            viewer = %viewer,
            "realtime channel connected"
        );
        Ok(())
    }

    pub fn channel_state(&self, viewer: &MemberId) -> ChannelState {
        self.channels
            .get(viewer)
            .map(|channel| channel.state())
            .unwrap_or(ChannelState::Disconnected)
    }

    /// Closes the viewer's realtime channel if one is open.
    pub async fn disconnect(&self, viewer: &MemberId) {
        if let Some((_, channel)) = self.channels.remove(viewer) {
            channel.stop().await;
            tracing::info!(
                target: "mstwins_sync::engine",
                viewer = %viewer,
                "realtime channel disconnected"
            );
        }
    }

    /// Ends the viewer's session: closes their channel and drops every
    /// cached view so nothing leaks across sign-ins on a shared device.
    /// Also releases the viewer's fetch guards and any change streams left
    /// without subscribers.
    pub async fn sign_out(&self, viewer: &MemberId) {
        self.disconnect(viewer).await;
        self.cache.clear();
        self.fetch_guards.retain(|(v, _), _| v != viewer);
        self.bus.prune_idle();
        tracing::info!(
            target: "mstwins_sync::engine",
            viewer = %viewer,
            "signed out, cache cleared"
        );
    }

    /// Records a like and invalidates the liker's relationship views.
    pub async fn like(&self, liker: &MemberId, liked: &MemberId) -> Result<()> {
        self.store
            .insert_like(&Like::new(liker.clone(), liked.clone()))
            .await?;
        self.invalidate_views(liker);
        Ok(())
    }

    /// Withdraws a like and invalidates the liker's relationship views.
    pub async fn unlike(&self, liker: &MemberId, liked: &MemberId) -> Result<()> {
        self.store.delete_like(liker, liked).await?;
        self.invalidate_views(liker);
        Ok(())
    }

    /// Records a pass and invalidates the passer's relationship views.
    pub async fn pass(&self, passer: &MemberId, passed: &MemberId) -> Result<()> {
        self.store
            .insert_pass(&Pass::new(passer.clone(), passed.clone()))
            .await?;
        self.invalidate_views(passer);
        Ok(())
    }

    /// Spawns the cache sweep and view refresh loops. Call once after
    /// construction; the loops run until [`SyncEngine::shutdown`].
    pub async fn start_background_tasks(self: Arc<Self>) {
        let tasks: Vec<Arc<dyn scheduler::Task>> = vec![
            Arc::new(scheduler::CacheSweep {
                interval: self.config.sweep_interval,
            }),
            Arc::new(scheduler::ViewRefresh {
                interval: self.config.refresh_interval,
            }),
        ];
        let shutdown = self.scheduler_shutdown.subscribe();
        let handles = scheduler::start_scheduled_tasks(Arc::clone(&self), shutdown, None, tasks);
        *self.scheduler_handles.lock().await = handles;
    }

    /// Stops every realtime channel and background task and waits for them.
    pub async fn shutdown(&self) {
        let viewers: Vec<MemberId> = self
            .channels
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for viewer in viewers {
            self.disconnect(&viewer).await;
        }
        self.shutdown_scheduled_tasks().await;
        tracing::info!(target: "mstwins_sync::engine", "shutdown complete");
    }

    async fn shutdown_scheduled_tasks(&self) {
        let _ = self.scheduler_shutdown.send(true);

        let mut handles = self.scheduler_handles.lock().await;
        if handles.is_empty() {
            tracing::debug!(
                target: "mstwins_sync::scheduler",
                "No scheduler tasks to await"
            );
            return;
        }

        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(
                        target: "mstwins_sync::scheduler",
                        "Scheduler task panicked: {:?}",
                        e
                    );
                } else {
                    tracing::warn!(
                        target: "mstwins_sync::scheduler",
                        "Scheduler task cancelled: {:?}",
                        e
                    );
                }
            }
        }
    }

    /// Drops the viewer's relationship views and notifies their subscribers.
    fn invalidate_views(&self, viewer: &MemberId) {
        for kind in realtime::AFFECTED {
            self.cache.invalidate(viewer.as_str(), Some(kind));
        }
        self.bus.emit(
            viewer,
            DataChanged {
                viewer: viewer.clone(),
                namespaces: realtime::AFFECTED.to_vec(),
            },
        );
    }

    pub(crate) fn sweep_expired_views(&self) -> usize {
        self.cache.sweep_expired()
    }

    /// Invalidates relationship views for every viewer with a change
    /// subscriber, returning how many viewers were refreshed. Streams whose
    /// subscribers are all gone are dropped on the same cadence.
    pub(crate) fn refresh_active_views(&self) -> usize {
        self.bus.prune_idle();
        let viewers = self.bus.active_viewers();
        for viewer in &viewers {
            self.invalidate_views(viewer);
        }
        viewers.len()
    }

    /// One lock per (viewer, namespace) so concurrent fetches of the same
    /// view coalesce instead of racing the store.
    pub(crate) fn fetch_guard(&self, viewer: &MemberId, kind: DataKind) -> Arc<Mutex<()>> {
        self.fetch_guards
            .entry((viewer.clone(), kind))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
