//! In-process broadcast of viewer data changes.
//!
//! When a mutation, realtime event, or scheduled refresh makes a viewer's
//! cached views stale, a [`DataChanged`] notification is emitted here so
//! every mounted consumer can re-fetch. The bus is typed; it replaces the
//! ad hoc DOM-event broadcast the web client used.

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::sync::cache::DataKind;
use crate::sync::models::MemberId;

const BUFFER_SIZE: usize = 100;

/// "Your cached views may be stale" notification for one viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChanged {
    pub viewer: MemberId,
    /// The namespaces whose cached entries were invalidated.
    pub namespaces: Vec<DataKind>,
}

pub struct ChangeBus {
    streams: DashMap<MemberId, broadcast::Sender<DataChanged>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }

    pub fn subscribe(&self, viewer: &MemberId) -> broadcast::Receiver<DataChanged> {
        self.streams
            .entry(viewer.clone())
            .or_insert_with(|| broadcast::channel(BUFFER_SIZE).0)
            .subscribe()
    }

    pub fn emit(&self, viewer: &MemberId, event: DataChanged) {
        if let Some(sender) = self.streams.get(viewer)
            && sender.send(event).is_err()
        {
            drop(sender);
            if self
                .streams
                .remove_if(viewer, |_, s| s.receiver_count() == 0)
                .is_some()
            {
                tracing::debug!(
                    target: "mstwins_sync::events",
                    viewer = %viewer,
                    "dropped idle change stream"
                );
            }
        }
    }

    pub fn has_subscribers(&self, viewer: &MemberId) -> bool {
        self.streams
            .get(viewer)
            .map(|sender| sender.receiver_count() > 0)
            .unwrap_or(false)
    }

    /// Drops streams whose last subscriber has gone away, returning how
    /// many were removed. Without this, a viewer who subscribed once would
    /// hold a map slot for the process lifetime.
    pub fn prune_idle(&self) -> usize {
        let before = self.streams.len();
        self.streams
            .retain(|_, sender| sender.receiver_count() > 0);
        before - self.streams.len()
    }

    /// Viewers that currently have at least one live subscriber. Used by the
    /// scheduled refresh task to know whose views are worth refreshing.
    pub fn active_viewers(&self) -> Vec<MemberId> {
        self.streams
            .iter()
            .filter(|entry| entry.value().receiver_count() > 0)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}
