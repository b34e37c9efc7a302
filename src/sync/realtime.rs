//! Realtime invalidation: keeping the cache honest.
//!
//! The hosted backend pushes row-level change notifications for the Like and
//! Match collections. [`RealtimeSync`] consumes a viewer-scoped feed of
//! those, validates each row into its typed record, and on any relevant
//! insert or delete invalidates the viewer's `likes`, `matches`, and
//! `discover` namespaces and emits a [`DataChanged`] broadcast.
//!
//! This is a best-effort freshness layer, not a correctness-critical one:
//! the fetchers re-verify server state on their own TTL regardless.
//! Reconnection after transport failures belongs to the transport itself;
//! channel error statuses are only logged here.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::sync::backend::StoreError;
use crate::sync::cache::{DataKind, ViewCache};
use crate::sync::events::{ChangeBus, DataChanged};
use crate::sync::models::{Like, Match, MemberId};

/// Namespaces invalidated by any relevant like/match change.
pub(crate) const AFFECTED: [DataKind; 3] =
    [DataKind::Likes, DataKind::Matches, DataKind::Discover];

/// The record collections the realtime channel reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Likes,
    Matches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOp {
    Insert,
    Delete,
}

/// A raw row-change notification as delivered by the transport. The row is
/// still untyped JSON; validation happens in [`ChangeEnvelope::decode`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    pub collection: Collection,
    pub op: ChangeOp,
    pub row: serde_json::Value,
}

/// A validated, typed record change.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange {
    LikeInserted(Like),
    LikeDeleted(Like),
    MatchInserted(Match),
    MatchDeleted(Match),
}

impl ChangeEnvelope {
    pub fn decode(self) -> Result<RecordChange, serde_json::Error> {
        Ok(match (self.collection, self.op) {
            (Collection::Likes, ChangeOp::Insert) => {
                RecordChange::LikeInserted(Like::from_row(self.row)?)
            }
            (Collection::Likes, ChangeOp::Delete) => {
                RecordChange::LikeDeleted(Like::from_row(self.row)?)
            }
            (Collection::Matches, ChangeOp::Insert) => {
                RecordChange::MatchInserted(Match::from_row(self.row)?)
            }
            (Collection::Matches, ChangeOp::Delete) => {
                RecordChange::MatchDeleted(Match::from_row(self.row)?)
            }
        })
    }
}

impl RecordChange {
    /// Whether this change affects the given viewer's cached views.
    pub fn is_relevant_to(&self, viewer: &MemberId) -> bool {
        match self {
            RecordChange::LikeInserted(like) | RecordChange::LikeDeleted(like) => {
                &like.liker == viewer || &like.liked == viewer
            }
            RecordChange::MatchInserted(m) | RecordChange::MatchDeleted(m) => m.involves(viewer),
        }
    }
}

/// Channel lifecycle statuses reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Connected,
    Error(String),
    Closed,
}

/// What the transport delivers on a subscribed channel.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    Change(ChangeEnvelope),
    Status(ChannelStatus),
}

/// The realtime transport seam. Subscribing yields a stream of change
/// envelopes already filtered to rows affecting the given viewer.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, viewer: &MemberId) -> Result<mpsc::Receiver<FeedMessage>, StoreError>;
}

/// Connection state of a viewer's realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Subscribed,
}

/// A running realtime subscription for one viewer.
pub struct RealtimeSync {
    viewer: MemberId,
    state: watch::Receiver<ChannelState>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RealtimeSync {
    /// Spawns the channel task consuming `rx` for `viewer`.
    pub(crate) fn start(
        viewer: MemberId,
        mut rx: mpsc::Receiver<FeedMessage>,
        cache: Arc<ViewCache>,
        bus: Arc<ChangeBus>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState::Subscribed);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task_viewer = viewer.clone();
        let handle = tokio::spawn(async move {
            tracing::debug!(
                target: "mstwins_sync::realtime",
                viewer = %task_viewer,
                "realtime channel subscribed"
            );
            loop {
                tokio::select! {
                    message = rx.recv() => {
                        match message {
                            Some(FeedMessage::Change(envelope)) => {
                                Self::handle_change(&task_viewer, envelope, &cache, &bus);
                            }
                            Some(FeedMessage::Status(ChannelStatus::Connected)) => {
                                tracing::debug!(
                                    target: "mstwins_sync::realtime",
                                    viewer = %task_viewer,
                                    "channel reported connected"
                                );
                            }
                            Some(FeedMessage::Status(ChannelStatus::Error(reason))) => {
                                // Best-effort layer: log and keep listening.
                                tracing::warn!(
                                    target: "mstwins_sync::realtime",
                                    viewer = %task_viewer,
                                    "channel reported error: {reason}"
                                );
                            }
                            Some(FeedMessage::Status(ChannelStatus::Closed)) | None => {
                                tracing::debug!(
                                    target: "mstwins_sync::realtime",
                                    viewer = %task_viewer,
                                    "channel closed"
                                );
                                break;
                            }
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            let _ = state_tx.send(ChannelState::Disconnected);
        });

        Self {
            viewer,
            state: state_rx,
            shutdown: shutdown_tx,
            handle,
        }
    }

    fn handle_change(
        viewer: &MemberId,
        envelope: ChangeEnvelope,
        cache: &ViewCache,
        bus: &ChangeBus,
    ) {
        let change = match envelope.decode() {
            Ok(change) => change,
            Err(err) => {
                tracing::warn!(
                    target: "mstwins_sync::realtime",
                    viewer = %viewer,
                    "dropping undecodable change row: {err}"
                );
                return;
            }
        };

        if !change.is_relevant_to(viewer) {
            tracing::trace!(
                target: "mstwins_sync::realtime",
                viewer = %viewer,
                ?change,
                "ignoring change not affecting viewer"
            );
            return;
        }

        for kind in AFFECTED {
            cache.invalidate(viewer.as_str(), Some(kind));
        }
        bus.emit(
            viewer,
            DataChanged {
                viewer: viewer.clone(),
                namespaces: AFFECTED.to_vec(),
            },
        );
        tracing::debug!(
            target: "mstwins_sync::realtime",
            viewer = %viewer,
            ?change,
            "invalidated cached views"
        );
    }

    pub fn viewer(&self) -> &MemberId {
        &self.viewer
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Signals the channel task to stop and waits for it to exit.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            if err.is_panic() {
                tracing::error!(
                    target: "mstwins_sync::realtime",
                    viewer = %self.viewer,
                    "realtime channel task panicked: {err:?}"
                );
            }
        }
    }
}
