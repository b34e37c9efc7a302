//! Bounded, namespaced TTL cache for dashboard view data.
//!
//! One `ViewCache` is shared by every fetcher in the process so that
//! multiple consumers asking for the same (viewer, data kind) within a short
//! window hit the network once. Writes invalidate surgically by namespace;
//! realtime sync and the mutation paths both go through [`ViewCache::invalidate`].
//!
//! Entries expire after a TTL (default 5 minutes) and the store is bounded
//! (default 50 entries) with oldest-inserted eviction, not LRU. Expired
//! entries are lazily removed on access and swept on every write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::sync::models::Profile;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// The cacheable dashboard data namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Profile,
    Likes,
    Matches,
    Discover,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Profile => "profile",
            DataKind::Likes => "likes",
            DataKind::Matches => "matches",
            DataKind::Discover => "discover",
        }
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed cache payloads. The fetchers only ever store profile lists or a
/// single profile, so the payload stays an enum instead of dynamic data.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedView {
    Profile(Box<Profile>),
    Profiles(Vec<Profile>),
}

struct Entry {
    view: CachedView,
    inserted_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    /// Monotonic insertion sequence, used for oldest-first eviction.
    seq: u64,
}

/// Structured cache key. Keeping the viewer id as its own component means
/// an id containing arbitrary characters can never collide with another
/// viewer's entries.
type ViewKey = (String, DataKind, String);

pub struct ViewCache {
    entries: DashMap<ViewKey, Entry>,
    seq: AtomicU64,
    ttl: Duration,
    max_entries: usize,
}

impl ViewCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            seq: AtomicU64::new(0),
            ttl,
            max_entries,
        }
    }

    /// Composite key of viewer, namespace, and deterministically serialized
    /// params (sorted `name=value` pairs joined by `&`).
    fn key(viewer: &str, kind: DataKind, params: &[(&str, &str)]) -> ViewKey {
        let mut pairs: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        (viewer.to_string(), kind, pairs.join("&"))
    }

    /// Stores a view, sweeping expired entries first and evicting the oldest
    /// inserted entry when at capacity. `ttl` overrides the cache default.
    pub fn set(
        &self,
        viewer: &str,
        kind: DataKind,
        params: &[(&str, &str)],
        view: CachedView,
        ttl: Option<Duration>,
    ) {
        self.sweep_expired();

        let key = Self::key(viewer, kind, params);
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_oldest();
        }

        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl.unwrap_or(self.ttl))
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        self.entries.insert(
            key.clone(),
            Entry {
                view,
                inserted_at: now,
                expires_at: now + ttl,
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        tracing::trace!(target: "mstwins_sync::cache", viewer, kind = %kind, "cached view");
    }

    /// Returns the cached view if present and unexpired. An expired entry is
    /// removed and treated as a miss.
    pub fn get(&self, viewer: &str, kind: DataKind, params: &[(&str, &str)]) -> Option<CachedView> {
        let key = Self::key(viewer, kind, params);
        let expired = match self.entries.get(&key) {
            Some(entry) if entry.expires_at > Utc::now() => return Some(entry.view.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(&key);
            tracing::trace!(target: "mstwins_sync::cache", viewer, kind = %kind, "expired on read");
        }
        None
    }

    /// Existence check with the same expiry semantics as [`ViewCache::get`].
    pub fn has(&self, viewer: &str, kind: DataKind, params: &[(&str, &str)]) -> bool {
        self.get(viewer, kind, params).is_some()
    }

    /// Removes every entry for the viewer, or only the given namespace.
    pub fn invalidate(&self, viewer: &str, kind: Option<DataKind>) {
        let before = self.entries.len();
        self.entries
            .retain(|(v, k, _), _| v != viewer || kind.is_some_and(|wanted| *k != wanted));
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(
                target: "mstwins_sync::cache",
                viewer,
                kind = kind.map(|k| k.as_str()),
                removed,
                "invalidated cache entries"
            );
        }
    }

    /// Removes everything. Used on sign-out.
    pub fn clear(&self) {
        self.entries.clear();
        tracing::debug!(target: "mstwins_sync::cache", "cache cleared");
    }

    /// Removes all expired entries, returning how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.seq)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            tracing::trace!(target: "mstwins_sync::cache", ?key, "evicted oldest entry");
        }
    }

    #[cfg(test)]
    fn inserted_at(&self, viewer: &str, kind: DataKind, params: &[(&str, &str)]) -> Option<DateTime<Utc>> {
        self.entries
            .get(&Self::key(viewer, kind, params))
            .map(|e| e.inserted_at)
    }
}

impl Default for ViewCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_utils::approved_profile;

    fn profiles_view(seed: &str) -> CachedView {
        CachedView::Profiles(vec![approved_profile(seed)])
    }

    #[test]
    fn get_returns_stored_view() {
        let cache = ViewCache::default();
        cache.set("v1", DataKind::Likes, &[], profiles_view("a"), None);

        let view = cache.get("v1", DataKind::Likes, &[]).expect("should hit");
        assert_eq!(view, profiles_view("a"));
        assert!(cache.has("v1", DataKind::Likes, &[]));
    }

    #[test]
    fn get_misses_on_absent_key() {
        let cache = ViewCache::default();
        assert!(cache.get("v1", DataKind::Likes, &[]).is_none());
        assert!(!cache.has("v1", DataKind::Likes, &[]));
    }

    #[test]
    fn expired_entry_is_removed_on_read() {
        let cache = ViewCache::default();
        cache.set(
            "v1",
            DataKind::Likes,
            &[],
            profiles_view("a"),
            Some(Duration::from_millis(10)),
        );
        std::thread::sleep(Duration::from_millis(25));

        assert!(cache.get("v1", DataKind::Likes, &[]).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn has_removes_expired_entry_too() {
        let cache = ViewCache::default();
        cache.set(
            "v1",
            DataKind::Likes,
            &[],
            profiles_view("a"),
            Some(Duration::from_millis(10)),
        );
        std::thread::sleep(Duration::from_millis(25));

        assert!(!cache.has("v1", DataKind::Likes, &[]));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn set_overwrites_existing_entry_without_eviction() {
        let cache = ViewCache::new(DEFAULT_TTL, 2);
        cache.set("v1", DataKind::Likes, &[], profiles_view("a"), None);
        cache.set("v1", DataKind::Matches, &[], profiles_view("b"), None);
        cache.set("v1", DataKind::Likes, &[], profiles_view("c"), None);

        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.get("v1", DataKind::Likes, &[]),
            Some(profiles_view("c"))
        );
        assert_eq!(
            cache.get("v1", DataKind::Matches, &[]),
            Some(profiles_view("b"))
        );
    }

    #[test]
    fn capacity_overflow_evicts_oldest_inserted() {
        let cache = ViewCache::new(DEFAULT_TTL, 2);
        cache.set("v1", DataKind::Likes, &[], profiles_view("a"), None);
        cache.set("v2", DataKind::Likes, &[], profiles_view("b"), None);
        cache.set("v3", DataKind::Likes, &[], profiles_view("c"), None);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("v1", DataKind::Likes, &[]).is_none());
        assert!(cache.has("v2", DataKind::Likes, &[]));
        assert!(cache.has("v3", DataKind::Likes, &[]));
    }

    #[test]
    fn live_entries_never_exceed_capacity() {
        let cache = ViewCache::new(DEFAULT_TTL, 5);
        for i in 0..20 {
            let viewer = format!("v{i}");
            cache.set(&viewer, DataKind::Discover, &[], profiles_view("p"), None);
            assert!(cache.len() <= 5);
        }
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn set_sweeps_expired_entries_first() {
        let cache = ViewCache::new(DEFAULT_TTL, 50);
        cache.set(
            "v1",
            DataKind::Likes,
            &[],
            profiles_view("a"),
            Some(Duration::from_millis(10)),
        );
        cache.set(
            "v2",
            DataKind::Likes,
            &[],
            profiles_view("b"),
            Some(Duration::from_millis(10)),
        );
        std::thread::sleep(Duration::from_millis(25));

        cache.set("v3", DataKind::Likes, &[], profiles_view("c"), None);

        assert_eq!(cache.len(), 1);
        assert!(cache.has("v3", DataKind::Likes, &[]));
    }

    #[test]
    fn invalidate_kind_is_scoped_to_viewer_and_namespace() {
        let cache = ViewCache::default();
        cache.set("v1", DataKind::Likes, &[], profiles_view("a"), None);
        cache.set("v1", DataKind::Matches, &[], profiles_view("b"), None);
        cache.set("v2", DataKind::Likes, &[], profiles_view("c"), None);

        cache.invalidate("v1", Some(DataKind::Likes));

        assert!(cache.get("v1", DataKind::Likes, &[]).is_none());
        assert!(cache.has("v1", DataKind::Matches, &[]));
        assert!(cache.has("v2", DataKind::Likes, &[]));
    }

    #[test]
    fn invalidate_without_kind_removes_all_viewer_entries() {
        let cache = ViewCache::default();
        cache.set("v1", DataKind::Likes, &[], profiles_view("a"), None);
        cache.set("v1", DataKind::Discover, &[("offset", "0")], profiles_view("b"), None);
        cache.set("v2", DataKind::Likes, &[], profiles_view("c"), None);

        cache.invalidate("v1", None);

        assert_eq!(cache.len(), 1);
        assert!(cache.has("v2", DataKind::Likes, &[]));
    }

    #[test]
    fn invalidate_does_not_cross_viewer_prefixes() {
        // "v1" must not strip entries for "v10".
        let cache = ViewCache::default();
        cache.set("v1", DataKind::Likes, &[], profiles_view("a"), None);
        cache.set("v10", DataKind::Likes, &[], profiles_view("b"), None);

        cache.invalidate("v1", None);

        assert!(cache.get("v1", DataKind::Likes, &[]).is_none());
        assert!(cache.has("v10", DataKind::Likes, &[]));
    }

    #[test]
    fn invalidate_is_exact_on_ids_containing_separators() {
        // An id like "a:b" must survive invalidation of viewer "a".
        let cache = ViewCache::default();
        cache.set("a", DataKind::Likes, &[], profiles_view("x"), None);
        cache.set("a:b", DataKind::Likes, &[], profiles_view("y"), None);

        cache.invalidate("a", None);

        assert!(cache.get("a", DataKind::Likes, &[]).is_none());
        assert!(cache.has("a:b", DataKind::Likes, &[]));
    }

    #[test]
    fn clear_removes_everything() {
        let cache = ViewCache::default();
        cache.set("v1", DataKind::Likes, &[], profiles_view("a"), None);
        cache.set("v2", DataKind::Matches, &[], profiles_view("b"), None);

        cache.clear();

        assert!(cache.is_empty());
    }

    #[test]
    fn params_are_order_insensitive() {
        let cache = ViewCache::default();
        cache.set(
            "v1",
            DataKind::Discover,
            &[("offset", "0"), ("page_size", "50")],
            profiles_view("a"),
            None,
        );

        let hit = cache.get(
            "v1",
            DataKind::Discover,
            &[("page_size", "50"), ("offset", "0")],
        );
        assert_eq!(hit, Some(profiles_view("a")));
    }

    #[test]
    fn differing_params_are_distinct_entries() {
        let cache = ViewCache::default();
        cache.set(
            "v1",
            DataKind::Discover,
            &[("offset", "0")],
            profiles_view("a"),
            None,
        );
        cache.set(
            "v1",
            DataKind::Discover,
            &[("offset", "50")],
            profiles_view("b"),
            None,
        );

        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.get("v1", DataKind::Discover, &[("offset", "0")]),
            Some(profiles_view("a"))
        );
    }

    #[test]
    fn sweep_expired_reports_dropped_count() {
        let cache = ViewCache::default();
        cache.set(
            "v1",
            DataKind::Likes,
            &[],
            profiles_view("a"),
            Some(Duration::from_millis(10)),
        );
        cache.set("v2", DataKind::Likes, &[], profiles_view("b"), None);
        std::thread::sleep(Duration::from_millis(25));

        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn overwrite_refreshes_insertion_order() {
        let cache = ViewCache::new(DEFAULT_TTL, 2);
        cache.set("v1", DataKind::Likes, &[], profiles_view("a"), None);
        cache.set("v2", DataKind::Likes, &[], profiles_view("b"), None);

        let first_inserted = cache.inserted_at("v1", DataKind::Likes, &[]).unwrap();
        // Rewriting v1 makes v2 the oldest entry.
        cache.set("v1", DataKind::Likes, &[], profiles_view("a2"), None);
        assert!(cache.inserted_at("v1", DataKind::Likes, &[]).unwrap() >= first_inserted);

        cache.set("v3", DataKind::Likes, &[], profiles_view("c"), None);

        assert!(cache.has("v1", DataKind::Likes, &[]));
        assert!(cache.get("v2", DataKind::Likes, &[]).is_none());
        assert!(cache.has("v3", DataKind::Likes, &[]));
    }
}
