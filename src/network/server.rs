//! WebSocket Game Server
//!
//! Async WebSocket front for the action processor. Each connection
//! authenticates, then creates matches, follows them, fetches snapshots and
//! submits actions. All writes go through `ActionProcessor::submit`; this
//! layer only maps connections to actors and frames replies.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::core::ids::{MatchId, UserId};
use crate::network::auth::Authenticator;
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::session::{SessionError, SessionManager};
use crate::services::IdentityDirectory;
use crate::sync::engine::{Actor, RulesEngine};
use crate::sync::processor::{ActionError, ActionProcessor, MatchSetup};
use crate::sync::record::{GameType, MatchRecord, SeatAssignment};
use crate::sync::store::MatchStore;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Close connections silent for this long.
    pub idle_timeout: Duration,
    /// Outbound queue depth per connection.
    pub outbound_queue: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            outbound_queue: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// The game server.
pub struct GameServer<R: RulesEngine, S: MatchStore> {
    config: ServerConfig,
    auth: Authenticator,
    processor: Arc<ActionProcessor<R, S>>,
    directory: Arc<dyn IdentityDirectory>,
    sessions: Arc<SessionManager>,
    shutdown_tx: broadcast::Sender<()>,
}

impl<R: RulesEngine, S: MatchStore> GameServer<R, S> {
    /// Create a new game server.
    pub fn new(
        config: ServerConfig,
        auth: Authenticator,
        processor: Arc<ActionProcessor<R, S>>,
        directory: Arc<dyn IdentityDirectory>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            auth,
            processor,
            directory,
            sessions: Arc::new(SessionManager::new()),
            shutdown_tx,
        }
    }

    /// Receiver that fires when the server shuts down.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Tell every client, then stop accepting and close connections.
    pub async fn shutdown(&self, reason: &str) {
        let told = self
            .sessions
            .broadcast(ServerMessage::Shutdown { reason: reason.to_string() })
            .await;
        info!(clients = told, "Shutting down");
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, GameServerError> {
        Ok(TcpListener::bind(&self.config.bind_addr).await?)
    }

    /// Bind and serve until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<(), GameServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.sessions.len().await >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let server = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(server.config.outbound_queue);

            if let Err(e) = server.sessions.register(addr, msg_tx.clone()).await {
                warn!("Rejecting {}: {}", addr, e);
                return;
            }

            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            loop {
                tokio::select! {
                    msg = tokio::time::timeout(server.config.idle_timeout, ws_receiver.next()) => {
                        match msg {
                            Err(_) => {
                                debug!("Client {} idle, closing", addr);
                                break;
                            }
                            Ok(Some(Ok(Message::Text(text)))) => {
                                match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => {
                                        server.handle_client_message(addr, client_msg, &msg_tx).await;
                                    }
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx
                                            .send(ServerMessage::error(None, ErrorCode::InvalidInput, "Invalid message format"))
                                            .await;
                                    }
                                }
                            }
                            Ok(Some(Ok(Message::Binary(_)))) => {
                                let _ = msg_tx
                                    .send(ServerMessage::error(None, ErrorCode::InvalidInput, "Binary frames are not supported"))
                                    .await;
                            }
                            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Ok(Some(Err(e))) => {
                                debug!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            Ok(Some(Ok(_))) => {}
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }

            let user = server.sessions.remove(addr).await;
            drop(msg_tx);
            // Flush queued replies (e.g. the shutdown notice)
            let _ = tokio::time::timeout(Duration::from_secs(1), sender_task).await;

            info!(user = ?user.map(|u| u.to_string()), "Client {} cleaned up", addr);
        });
    }

    /// Handle a client message.
    async fn handle_client_message(
        &self,
        addr: SocketAddr,
        msg: ClientMessage,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let reply = match msg {
            ClientMessage::Auth { token, client_version } => {
                self.handle_auth(addr, &token, &client_version).await
            }
            ClientMessage::Ping { timestamp } => Some(ServerMessage::Pong {
                timestamp,
                server_time: chrono::Utc::now().timestamp_millis() as u64,
            }),
            other => {
                let request_id = request_id_of(&other);
                match self.sessions.require_user(addr).await {
                    Ok(user) => self.handle_authenticated(addr, user, other, sender).await,
                    Err(_) => Some(ServerMessage::error(
                        request_id,
                        ErrorCode::NotAuthenticated,
                        "Must authenticate first",
                    )),
                }
            }
        };

        if let Some(reply) = reply {
            let _ = sender.send(reply).await;
        }
    }

    async fn handle_auth(&self, addr: SocketAddr, token: &str, client_version: &str) -> Option<ServerMessage> {
        let reply = match self.auth.authenticate(token) {
            Ok(user) => match self.sessions.authenticate(addr, user).await {
                Ok(()) => {
                    debug!(user = %user, client_version, "Client {} authenticated", addr);
                    ServerMessage::AuthResult {
                        success: true,
                        user_id: Some(user),
                        error: None,
                        code: None,
                        server_version: self.config.version.clone(),
                    }
                }
                Err(e) => ServerMessage::error(None, ErrorCode::InternalError, e.to_string()),
            },
            Err(e) => {
                debug!("Auth failed for {}: {}", addr, e);
                ServerMessage::AuthResult {
                    success: false,
                    user_id: None,
                    error: Some(e.to_string()),
                    code: Some(e.code()),
                    server_version: self.config.version.clone(),
                }
            }
        };
        Some(reply)
    }

    async fn handle_authenticated(
        &self,
        addr: SocketAddr,
        user: UserId,
        msg: ClientMessage,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Option<ServerMessage> {
        match msg {
            ClientMessage::CreateMatch { request_id, game_type, seats } => {
                Some(self.handle_create(user, request_id, game_type, seats).await)
            }
            ClientMessage::Subscribe { match_id } => self.handle_subscribe(addr, match_id, sender).await,
            ClientMessage::Unsubscribe { match_id } => {
                self.sessions.unsubscribe(addr, match_id).await;
                None
            }
            ClientMessage::SyncRequest { request_id, match_id } => {
                Some(self.handle_sync(request_id, match_id).await)
            }
            ClientMessage::SubmitAction { request_id, match_id, client_version, action } => {
                Some(self.handle_submit(user, request_id, match_id, client_version, action).await)
            }
            ClientMessage::Auth { .. } | ClientMessage::Ping { .. } => None,
        }
    }

    async fn handle_create(
        &self,
        host: UserId,
        request_id: u64,
        game_type: GameType,
        seats: Vec<SeatAssignment>,
    ) -> ServerMessage {
        if game_type != self.processor.engine().game_type() {
            return ServerMessage::error(
                Some(request_id),
                ErrorCode::UnsupportedGame,
                format!("{:?} is not served here", game_type),
            );
        }
        let setup = MatchSetup { seats, host: Some(host), seed: None };
        match self.processor.create_match(setup).await {
            Ok(record) => ServerMessage::MatchCreated { request_id, match_id: record.id },
            Err(e) => ServerMessage::error(Some(request_id), ErrorCode::from_action_error(&e), e.to_string()),
        }
    }

    async fn handle_subscribe(
        &self,
        addr: SocketAddr,
        match_id: MatchId,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Option<ServerMessage> {
        if let Err(e) = self.processor.store().load(match_id).await {
            return Some(ServerMessage::error(None, ErrorCode::MatchNotFound, e.to_string()));
        }

        let mut events = self.processor.hub().subscribe(match_id).await;
        let tx = sender.clone();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if tx.send(ServerMessage::Event { event }).await.is_err() {
                            break;
                        }
                    }
                    // The client sees the gap and resnapshots
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(match_id = %match_id.short(), missed = n, "Subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        match self.sessions.subscribe(addr, match_id, task).await {
            Ok(_) => None,
            Err(e) => Some(ServerMessage::error(None, ErrorCode::InternalError, e.to_string())),
        }
    }

    async fn handle_sync(&self, request_id: u64, match_id: MatchId) -> ServerMessage {
        match self.processor.snapshot(match_id).await {
            Ok(snapshot) => {
                let users: Vec<UserId> =
                    snapshot.record.roster.iter().filter_map(|s| s.identity).collect();
                let profiles = self.directory.profiles(&users).await;
                ServerMessage::Snapshot { request_id, snapshot, profiles }
            }
            Err(e) => ServerMessage::error(Some(request_id), ErrorCode::from_action_error(&e), e.to_string()),
        }
    }

    async fn handle_submit(
        &self,
        user: UserId,
        request_id: u64,
        match_id: MatchId,
        client_version: u64,
        action: serde_json::Value,
    ) -> ServerMessage {
        let actor = match self.processor.store().load(match_id).await {
            Ok(record) => actor_for(&record, user),
            Err(e) => return ServerMessage::rejected(request_id, &ActionError::from(e)),
        };
        match self
            .processor
            .submit_json(match_id, client_version, actor, action)
            .await
        {
            Ok(committed) => ServerMessage::ActionAccepted {
                request_id,
                new_version: committed.new_version,
                summary: committed.summary,
            },
            Err(e) => ServerMessage::rejected(request_id, &e),
        }
    }
}

/// A user acts through their seat while present, otherwise as themselves.
fn actor_for(record: &MatchRecord, user: UserId) -> Actor {
    record
        .roster
        .iter()
        .find(|s| s.identity == Some(user) && s.is_present())
        .map(|s| Actor::Seat(s.index))
        .unwrap_or(Actor::User(user))
}

fn request_id_of(msg: &ClientMessage) -> Option<u64> {
    match msg {
        ClientMessage::CreateMatch { request_id, .. }
        | ClientMessage::SyncRequest { request_id, .. }
        | ClientMessage::SubmitAction { request_id, .. } => Some(*request_id),
        _ => None,
    }
}
