//! Optimized read paths for likes, matches, and the viewer's own profile.
//!
//! Each fetch checks the view cache, then takes a per-(viewer, namespace)
//! guard and re-checks before touching the store, so concurrent callers for
//! the same view coalesce onto one round trip. Independent queries run
//! concurrently with `tokio::join!` and fail fast if either side errors.
//! Empty id sets short-circuit before the batch profile lookup.

use std::collections::HashSet;

use crate::sync::SyncEngine;
use crate::sync::cache::{CachedView, DataKind};
use crate::sync::error::Result;
use crate::sync::models::{MemberId, Profile};

impl SyncEngine {
    /// Profiles of members who liked `viewer` and are not already matched
    /// with them. A like that has become a match is presented as a match
    /// only, never as a pending like.
    pub async fn likes_received_profiles(&self, viewer: &MemberId) -> Result<Vec<Profile>> {
        if let Some(CachedView::Profiles(profiles)) =
            self.cache.get(viewer.as_str(), DataKind::Likes, &[])
        {
            return Ok(profiles);
        }

        let guard = self.fetch_guard(viewer, DataKind::Likes);
        let _lock = guard.lock().await;
        if let Some(CachedView::Profiles(profiles)) =
            self.cache.get(viewer.as_str(), DataKind::Likes, &[])
        {
            return Ok(profiles);
        }

        let (likes, matches) = tokio::join!(
            self.store.likes_received(viewer),
            self.store.matches_for(viewer),
        );
        let (likes, matches) = (likes?, matches?);

        let matched: HashSet<MemberId> = matches
            .iter()
            .filter_map(|m| m.counterpart_of(viewer))
            .cloned()
            .collect();

        let mut seen = HashSet::new();
        let liker_ids: Vec<MemberId> = likes
            .into_iter()
            .map(|l| l.liker)
            .filter(|id| !matched.contains(id) && seen.insert(id.clone()))
            .collect();

        let profiles = self.profiles_or_empty(&liker_ids).await?;
        tracing::debug!(
            target: "mstwins_sync::likes",
            viewer = %viewer,
            pending = profiles.len(),
            matched = matched.len(),
            "likes view fetched"
        );
        self.cache.set(
            viewer.as_str(),
            DataKind::Likes,
            &[],
            CachedView::Profiles(profiles.clone()),
            None,
        );
        Ok(profiles)
    }

    /// Profiles of every member matched with `viewer`, in match order.
    pub async fn matched_profiles(&self, viewer: &MemberId) -> Result<Vec<Profile>> {
        if let Some(CachedView::Profiles(profiles)) =
            self.cache.get(viewer.as_str(), DataKind::Matches, &[])
        {
            return Ok(profiles);
        }

        let guard = self.fetch_guard(viewer, DataKind::Matches);
        let _lock = guard.lock().await;
        if let Some(CachedView::Profiles(profiles)) =
            self.cache.get(viewer.as_str(), DataKind::Matches, &[])
        {
            return Ok(profiles);
        }

        let matches = self.store.matches_for(viewer).await?;
        let counterpart_ids: Vec<MemberId> = matches
            .iter()
            .filter_map(|m| m.counterpart_of(viewer))
            .cloned()
            .collect();

        let profiles = self.profiles_or_empty(&counterpart_ids).await?;
        tracing::debug!(
            target: "mstwins_sync::likes",
            viewer = %viewer,
            matches = profiles.len(),
            "matches view fetched"
        );
        self.cache.set(
            viewer.as_str(),
            DataKind::Matches,
            &[],
            CachedView::Profiles(profiles.clone()),
            None,
        );
        Ok(profiles)
    }

    /// The viewer's own profile, or `None` when it does not exist yet.
    pub async fn own_profile(&self, viewer: &MemberId) -> Result<Option<Profile>> {
        if let Some(CachedView::Profile(profile)) =
            self.cache.get(viewer.as_str(), DataKind::Profile, &[])
        {
            return Ok(Some(*profile));
        }

        let guard = self.fetch_guard(viewer, DataKind::Profile);
        let _lock = guard.lock().await;
        if let Some(CachedView::Profile(profile)) =
            self.cache.get(viewer.as_str(), DataKind::Profile, &[])
        {
            return Ok(Some(*profile));
        }

        let mut profiles = self
            .store
            .profiles_by_ids(std::slice::from_ref(viewer))
            .await?;
        let Some(profile) = profiles.pop() else {
            return Ok(None);
        };
        self.cache.set(
            viewer.as_str(),
            DataKind::Profile,
            &[],
            CachedView::Profile(Box::new(profile.clone())),
            None,
        );
        Ok(Some(profile))
    }

    /// Batch profile lookup that never hits the store for an empty id set.
    async fn profiles_or_empty(&self, ids: &[MemberId]) -> Result<Vec<Profile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut profiles = self.store.profiles_by_ids(ids).await?;
        // Preserve the caller's id ordering; the store may return any order.
        let rank: std::collections::HashMap<&MemberId, usize> =
            ids.iter().enumerate().map(|(i, id)| (id, i)).collect();
        profiles.sort_by_key(|p| rank.get(&p.id).copied().unwrap_or(usize::MAX));
        Ok(profiles)
    }
}
