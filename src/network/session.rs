//! Connection Sessions
//!
//! Per-connection state kept by the server: who the connection authenticated
//! as and which matches it follows. Each
//! subscription is a forwarding task from the `EventHub` to the connection's
//! outbound queue; dropping the subscription aborts the task.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::core::ids::{MatchId, UserId};
use crate::network::protocol::ServerMessage;

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No session for this address.
    #[error("no session for {0}")]
    NotFound(SocketAddr),

    /// Address already registered.
    #[error("session already registered for {0}")]
    AlreadyRegistered(SocketAddr),

    /// Connection has not authenticated.
    #[error("not authenticated")]
    NotAuthenticated,
}

/// One live connection.
pub struct ClientSession {
    /// Authenticated user.
    pub user: Option<UserId>,
    /// Outbound queue.
    sender: mpsc::Sender<ServerMessage>,
    /// Forwarding task per followed match.
    subscriptions: BTreeMap<MatchId, JoinHandle<()>>,
}

impl ClientSession {
    fn new(sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            user: None,
            sender,
            subscriptions: BTreeMap::new(),
        }
    }

    fn drop_subscriptions(&mut self) {
        for (_, task) in std::mem::take(&mut self.subscriptions) {
            task.abort();
        }
    }
}

/// Registry of live connections.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<BTreeMap<SocketAddr, ClientSession>>,
}

impl SessionManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection.
    pub async fn register(
        &self,
        addr: SocketAddr,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&addr) {
            return Err(SessionError::AlreadyRegistered(addr));
        }
        sessions.insert(addr, ClientSession::new(sender));
        Ok(())
    }

    /// Record the authenticated user. Re-authenticating as someone else
    /// drops existing subscriptions.
    pub async fn authenticate(&self, addr: SocketAddr, user: UserId) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&addr).ok_or(SessionError::NotFound(addr))?;
        if session.user.is_some_and(|current| current != user) {
            session.drop_subscriptions();
        }
        session.user = Some(user);
        Ok(())
    }

    /// Authenticated user of a connection.
    pub async fn require_user(&self, addr: SocketAddr) -> Result<UserId, SessionError> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&addr).ok_or(SessionError::NotFound(addr))?;
        session.user.ok_or(SessionError::NotAuthenticated)
    }

    /// Attach a forwarding task. Returns `false` (and aborts `task`) if the
    /// connection already follows the match.
    pub async fn subscribe(
        &self,
        addr: SocketAddr,
        match_id: MatchId,
        task: JoinHandle<()>,
    ) -> Result<bool, SessionError> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(&addr) else {
            task.abort();
            return Err(SessionError::NotFound(addr));
        };
        if session.subscriptions.contains_key(&match_id) {
            task.abort();
            return Ok(false);
        }
        session.subscriptions.insert(match_id, task);
        Ok(true)
    }

    /// Stop following a match.
    pub async fn unsubscribe(&self, addr: SocketAddr, match_id: MatchId) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&addr).and_then(|s| s.subscriptions.remove(&match_id)) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Matches a connection follows.
    pub async fn subscriptions(&self, addr: SocketAddr) -> Vec<MatchId> {
        self.sessions
            .read()
            .await
            .get(&addr)
            .map(|s| s.subscriptions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Remove a connection, aborting its subscriptions.
    pub async fn remove(&self, addr: SocketAddr) -> Option<UserId> {
        let mut session = self.sessions.write().await.remove(&addr)?;
        session.drop_subscriptions();
        session.user
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Send to every connection; returns how many accepted it.
    pub async fn broadcast(&self, message: ServerMessage) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.sender.try_send(message.clone()).is_ok())
            .count()
    }
}
