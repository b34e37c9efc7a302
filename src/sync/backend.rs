//! The query/mutation seam to the hosted backend.
//!
//! Everything this crate knows about the relational backend goes through
//! [`ProfileStore`]. The trait mirrors the operations the hosted client
//! exposes: equality filters, set-membership exclusion, ordering, and
//! offset/limit pagination over the four record collections. Match rows are
//! inserted by the backend itself (reciprocal-like trigger); this layer only
//! reads them.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::sync::models::{Like, Match, MemberId, Pass, Profile};

#[derive(Error, Debug)]
pub enum StoreError {
    /// Connectivity or backend-side transient failure. Candidates for retry.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the query or mutation.
    #[error("query rejected: {0}")]
    Rejected(String),

    /// A returned row did not validate into its typed record.
    #[error("row decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Read/write operations against the hosted record collections.
///
/// `approved_profiles_page` must return profiles ordered by last-active
/// descending, restricted to approved moderation status, and excluding every
/// id in `exclude`. Pagination is offset-based over that filtered ordering.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Likes where the viewer is the liked party ("who liked me" raw rows).
    async fn likes_received(&self, viewer: &MemberId) -> Result<Vec<Like>, StoreError>;

    /// Likes the viewer has sent.
    async fn likes_sent(&self, viewer: &MemberId) -> Result<Vec<Like>, StoreError>;

    /// Passes the viewer has recorded.
    async fn passes_sent(&self, viewer: &MemberId) -> Result<Vec<Pass>, StoreError>;

    /// Matches involving the viewer on either side.
    async fn matches_for(&self, viewer: &MemberId) -> Result<Vec<Match>, StoreError>;

    /// Hydrates full profiles for exactly the given ids. Unknown ids are
    /// silently absent from the result.
    async fn profiles_by_ids(&self, ids: &[MemberId]) -> Result<Vec<Profile>, StoreError>;

    /// A page of approved profiles, last-active descending, excluding
    /// `exclude`.
    async fn approved_profiles_page(
        &self,
        exclude: &HashSet<MemberId>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Profile>, StoreError>;

    async fn insert_like(&self, like: &Like) -> Result<(), StoreError>;

    async fn delete_like(&self, liker: &MemberId, liked: &MemberId) -> Result<(), StoreError>;

    async fn insert_pass(&self, pass: &Pass) -> Result<(), StoreError>;
}
