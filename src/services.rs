//! External collaborators
//!
//! The core calls out for presentation-only identity lookups and for
//! fire-and-forget notices. Neither ever influences rule evaluation or
//! match-state consistency.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::core::ids::{MatchId, SeatIndex, UserId};

/// Display data for a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// User
    pub user_id: UserId,
    /// Display name
    pub display_name: String,
    /// Avatar URL or key
    pub avatar: Option<String>,
    /// ISO country code
    pub country: Option<String>,
}

/// Identity lookup failed.
#[derive(Debug, Clone, Error)]
#[error("identity lookup failed: {0}")]
pub struct LookupError(pub String);

/// `userId -> displayName, avatar, country`.
#[async_trait]
pub trait IdentityDirectory: Send + Sync + 'static {
    /// Look up a profile; `Ok(None)` for unknown users.
    async fn profile(&self, user: UserId) -> Result<Option<Profile>, LookupError>;

    /// Resolve many users. Lookup failures resolve to no profile.
    async fn profiles(&self, users: &[UserId]) -> Vec<Profile> {
        let mut out = Vec::with_capacity(users.len());
        for user in users {
            match self.profile(*user).await {
                Ok(Some(profile)) => out.push(profile),
                Ok(None) => {}
                Err(e) => debug!(user = %user, error = %e, "Profile lookup failed"),
            }
        }
        out
    }
}

/// Directory backed by a map.
#[derive(Default)]
pub struct MemoryIdentityDirectory {
    profiles: RwLock<BTreeMap<UserId, Profile>>,
}

impl MemoryIdentityDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a profile.
    pub async fn upsert(&self, profile: Profile) {
        self.profiles.write().await.insert(profile.user_id, profile);
    }
}

#[async_trait]
impl IdentityDirectory for MemoryIdentityDirectory {
    async fn profile(&self, user: UserId) -> Result<Option<Profile>, LookupError> {
        Ok(self.profiles.read().await.get(&user).cloned())
    }
}

/// Informational notice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// The turn passed to a human seat.
    YourTurn {
        /// Match
        match_id: MatchId,
        /// Seat now owning the turn
        seat: SeatIndex,
        /// Occupant
        user: UserId,
    },
    /// The match finished.
    MatchCompleted {
        /// Match
        match_id: MatchId,
        /// Winning seat
        winner: Option<SeatIndex>,
    },
}

/// Fire-and-forget notification delivery.
pub trait Notifier: Send + Sync + 'static {
    /// Queue a notice. Must not block.
    fn notify(&self, notice: Notice);
}

/// Notifier that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        info!(?notice, "Notice");
    }
}

/// Notifier that forwards into a channel, dropping notices when full.
#[derive(Clone, Debug)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Notice>,
}

impl ChannelNotifier {
    /// Create a notifier and its receiving end.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notice>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        if self.tx.try_send(notice).is_err() {
            debug!("Notice dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl IdentityDirectory for Failing {
        async fn profile(&self, _user: UserId) -> Result<Option<Profile>, LookupError> {
            Err(LookupError("down".to_string()))
        }
    }

    fn profile(byte: u8) -> Profile {
        Profile {
            user_id: UserId::from_bytes([byte; 16]),
            display_name: format!("player-{}", byte),
            avatar: None,
            country: Some("SE".to_string()),
        }
    }

    #[tokio::test]
    async fn test_memory_directory() {
        let dir = MemoryIdentityDirectory::new();
        dir.upsert(profile(1)).await;

        let found = dir
            .profiles(&[UserId::from_bytes([1; 16]), UserId::from_bytes([2; 16])])
            .await;
        assert_eq!(found, vec![profile(1)]);
    }

    #[tokio::test]
    async fn test_lookup_failure_resolves_to_nothing() {
        let found = Failing.profiles(&[UserId::from_bytes([1; 16])]).await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_channel_notifier_drops_when_full() {
        let (notifier, mut rx) = ChannelNotifier::new(1);
        let notice = Notice::MatchCompleted { match_id: MatchId::from_bytes([1; 16]), winner: Some(0) };
        notifier.notify(notice.clone());
        notifier.notify(notice.clone());

        assert_eq!(rx.recv().await, Some(notice));
        assert!(rx.try_recv().is_err());
    }
}
