//! Event Hub
//!
//! Pushes committed events to subscribers. Delivery is best effort: a slow
//! receiver lags and loses events, which viewers detect as a sequence gap.

use std::collections::BTreeMap;

use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::core::ids::MatchId;
use crate::sync::event::Event;

/// Per-match and global broadcast of committed events.
pub struct EventHub {
    capacity: usize,
    matches: RwLock<BTreeMap<MatchId, broadcast::Sender<Event>>>,
    all: broadcast::Sender<Event>,
}

impl EventHub {
    /// Create a hub whose channels buffer `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (all, _) = broadcast::channel(capacity);
        Self {
            capacity,
            matches: RwLock::new(BTreeMap::new()),
            all,
        }
    }

    /// Subscribe to one match.
    pub async fn subscribe(&self, match_id: MatchId) -> broadcast::Receiver<Event> {
        let mut matches = self.matches.write().await;
        matches
            .entry(match_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribe to every match.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Publish a committed event. Returns the number of per-match receivers.
    pub async fn publish(&self, event: &Event) -> usize {
        let _ = self.all.send(event.clone());

        let matches = self.matches.read().await;
        let delivered = matches
            .get(&event.match_id)
            .and_then(|tx| tx.send(event.clone()).ok())
            .unwrap_or(0);

        debug!(
            match_id = %event.match_id.short(),
            seq = event.seq,
            receivers = delivered,
            "Event published"
        );
        delivered
    }

    /// Drop a match channel, ending every subscription to it. Receivers
    /// still drain what was already published.
    pub async fn close(&self, match_id: MatchId) {
        if self.matches.write().await.remove(&match_id).is_some() {
            debug!(match_id = %match_id.short(), "Match channel closed");
        }
    }

    /// Drop channels nobody listens to anymore.
    pub async fn prune(&self) -> usize {
        let mut matches = self.matches.write().await;
        let before = matches.len();
        matches.retain(|_, tx| tx.receiver_count() > 0);
        before - matches.len()
    }

    /// Number of live per-match channels.
    pub async fn open_channels(&self) -> usize {
        self.matches.read().await.len()
    }
}
