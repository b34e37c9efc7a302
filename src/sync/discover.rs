//! Paginated discover feed for one viewer.
//!
//! A `DiscoverFeed` is a per-viewer browsing session. On first use it fetches
//! the viewer's outgoing likes and passes concurrently, unions them with the
//! viewer's own id into an exclusion set, then pages through approved
//! profiles (last-active descending) with an offset cursor. `preload` fetches
//! the next page for infinite scroll without re-fetching the exclusion
//! queries; `refresh` resets the cursor and exclusion set and starts over.
//!
//! An in-flight flag makes a concurrent second fetch a no-op, so rapid
//! repeated triggers cannot race the cursor.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::sync::backend::ProfileStore;
use crate::sync::cache::{CachedView, DataKind, ViewCache};
use crate::sync::error::Result;
use crate::sync::models::{MemberId, Profile};

pub const DEFAULT_PAGE_SIZE: usize = 50;

struct FeedState {
    excluded: HashSet<MemberId>,
    exclusions_loaded: bool,
    offset: usize,
    profiles: Vec<Profile>,
    has_more: bool,
}

impl FeedState {
    fn fresh(viewer: &MemberId) -> Self {
        let mut excluded = HashSet::new();
        excluded.insert(viewer.clone());
        Self {
            excluded,
            exclusions_loaded: false,
            offset: 0,
            profiles: Vec::new(),
            has_more: true,
        }
    }
}

pub struct DiscoverFeed {
    store: Arc<dyn ProfileStore>,
    cache: Arc<ViewCache>,
    viewer: MemberId,
    page_size: usize,
    state: Mutex<FeedState>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the fetch path exits, error paths included.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DiscoverFeed {
    pub(crate) fn new(
        store: Arc<dyn ProfileStore>,
        cache: Arc<ViewCache>,
        viewer: MemberId,
        page_size: usize,
    ) -> Self {
        let state = FeedState::fresh(&viewer);
        Self {
            store,
            cache,
            viewer,
            page_size,
            state: Mutex::new(state),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Loads the next page, fetching the exclusion set first if this is the
    /// session's first fetch. Returns the newly appended profiles; returns
    /// an empty page without fetching when a fetch is already in flight or
    /// the feed is exhausted.
    pub async fn load_next_page(&self) -> Result<Vec<Profile>> {
        self.fetch_page().await
    }

    /// Loads the next page for read-ahead during infinite scroll. The
    /// exclusion queries run at most once per session, so a preload after
    /// the first page costs a single page fetch.
    pub async fn preload(&self) -> Result<Vec<Profile>> {
        self.fetch_page().await
    }

    /// Resets the cursor, exclusion set, and accumulated results, then loads
    /// the first page from scratch.
    pub async fn refresh(&self) -> Result<Vec<Profile>> {
        {
            let mut state = self.state.lock().await;
            *state = FeedState::fresh(&self.viewer);
        }
        self.cache
            .invalidate(self.viewer.as_str(), Some(DataKind::Discover));
        tracing::debug!(
            target: "mstwins_sync::discover",
            viewer = %self.viewer,
            "discover feed reset"
        );
        self.load_next_page().await
    }

    async fn fetch_page(&self) -> Result<Vec<Profile>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(
                target: "mstwins_sync::discover",
                viewer = %self.viewer,
                "fetch already in flight, skipping"
            );
            return Ok(Vec::new());
        }
        let _guard = InFlightGuard(&self.in_flight);

        let mut state = self.state.lock().await;
        if !state.has_more {
            return Ok(Vec::new());
        }

        if !state.exclusions_loaded {
            // Both id sets are required before paging; fail fast if either
            // query fails so a partial exclusion set never leaks profiles the
            // viewer already decided on.
            let (likes, passes) = tokio::join!(
                self.store.likes_sent(&self.viewer),
                self.store.passes_sent(&self.viewer),
            );
            let (likes, passes) = (likes?, passes?);
            state.excluded.extend(likes.into_iter().map(|l| l.liked));
            state.excluded.extend(passes.into_iter().map(|p| p.passed));
            state.exclusions_loaded = true;
            tracing::debug!(
                target: "mstwins_sync::discover",
                viewer = %self.viewer,
                excluded = state.excluded.len(),
                "exclusion set loaded"
            );
        }

        let page = self
            .store
            .approved_profiles_page(&state.excluded, state.offset, self.page_size)
            .await?;

        let first_page = state.offset == 0;
        state.has_more = page.len() == self.page_size;
        state.offset += self.page_size;
        state.profiles.extend(page.iter().cloned());

        if first_page {
            self.cache.set(
                self.viewer.as_str(),
                DataKind::Discover,
                &[("offset", "0")],
                CachedView::Profiles(page.clone()),
                None,
            );
        }

        tracing::debug!(
            target: "mstwins_sync::discover",
            viewer = %self.viewer,
            page_len = page.len(),
            total = state.profiles.len(),
            has_more = state.has_more,
            "discover page loaded"
        );
        Ok(page)
    }

    /// All profiles accumulated so far in this session.
    pub async fn profiles(&self) -> Vec<Profile> {
        self.state.lock().await.profiles.clone()
    }

    pub async fn has_more(&self) -> bool {
        self.state.lock().await.has_more
    }

    pub fn viewer(&self) -> &MemberId {
        &self.viewer
    }
}
