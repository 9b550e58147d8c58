//! WebSocket Connection
//!
//! Client transport for the sync agent. One background task owns the
//! socket: it authenticates, re-subscribes every followed match after each
//! reconnect, routes replies to waiting requests by `request_id`, and turns
//! pushes and link changes into `TransportSignal`s.
//!
//! Reconnects back off exponentially. Requests made while the link is down
//! fail at once; the agent retries through its own fetch loop.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::client::driver::{FetchError, SnapshotSource, TransportSignal};
use crate::core::ids::MatchId;
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::services::Profile;
use crate::sync::record::{GameType, SeatAssignment, Snapshot};

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server URL, `ws://host:port`.
    pub url: String,
    /// Token sent on every (re)connect.
    pub token: String,
    /// Reported client version.
    pub client_version: String,
    /// First reconnect delay.
    pub initial_backoff: Duration,
    /// Reconnect delay cap.
    pub max_backoff: Duration,
    /// Give up on a reply after this long.
    pub request_timeout: Duration,
}

impl ConnectionConfig {
    /// Defaults for a server URL and token.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Outcome of a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Committed.
    Accepted {
        /// Version after commit
        new_version: u64,
        /// Result summary
        summary: String,
    },
    /// Refused.
    Rejected {
        /// Error class
        code: ErrorCode,
        /// Detail
        message: String,
        /// Current version, for conflicts
        current_version: Option<u64>,
    },
}

enum Outbound {
    Request {
        request_id: u64,
        message: ClientMessage,
        reply: oneshot::Sender<ServerMessage>,
    },
    Fire(ClientMessage),
}

/// Handle to the connection task.
pub struct Connection {
    outbound: mpsc::Sender<Outbound>,
    next_request: AtomicU64,
    request_timeout: Duration,
}

impl Connection {
    /// Start the connection task. Signals go to `signals`; the task stops
    /// when the last handle is dropped.
    pub fn spawn(config: ConnectionConfig, signals: mpsc::Sender<TransportSignal>) -> (Self, JoinHandle<()>) {
        let (outbound, rx) = mpsc::channel(64);
        let request_timeout = config.request_timeout;
        let task = tokio::spawn(run(config, rx, signals));
        let connection = Self { outbound, next_request: AtomicU64::new(1), request_timeout };
        (connection, task)
    }

    async fn request(&self, build: impl FnOnce(u64) -> ClientMessage) -> Result<ServerMessage, FetchError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        self.outbound
            .send(Outbound::Request { request_id, message: build(request_id), reply })
            .await
            .map_err(|_| FetchError::Transport("connection closed".into()))?;

        match tokio::time::timeout(self.request_timeout, response).await {
            Err(_) => Err(FetchError::Timeout),
            Ok(Err(_)) => Err(FetchError::Transport("link down".into())),
            Ok(Ok(ServerMessage::Error { code, message, .. })) => {
                Err(FetchError::Rejected(format!("{:?}: {}", code, message)))
            }
            Ok(Ok(message)) => Ok(message),
        }
    }

    async fn fire(&self, message: ClientMessage) -> Result<(), FetchError> {
        self.outbound
            .send(Outbound::Fire(message))
            .await
            .map_err(|_| FetchError::Transport("connection closed".into()))
    }

    /// Follow a match; kept across reconnects.
    pub async fn subscribe(&self, match_id: MatchId) -> Result<(), FetchError> {
        self.fire(ClientMessage::Subscribe { match_id }).await
    }

    /// Stop following a match.
    pub async fn unsubscribe(&self, match_id: MatchId) -> Result<(), FetchError> {
        self.fire(ClientMessage::Unsubscribe { match_id }).await
    }

    /// Snapshot plus display profiles.
    pub async fn snapshot_with_profiles(&self, match_id: MatchId) -> Result<(Snapshot, Vec<Profile>), FetchError> {
        match self
            .request(|request_id| ClientMessage::SyncRequest { request_id, match_id })
            .await?
        {
            ServerMessage::Snapshot { snapshot, profiles, .. } => Ok((snapshot, profiles)),
            other => Err(unexpected(&other)),
        }
    }

    /// Create a match hosted by this connection's user.
    pub async fn create_match(
        &self,
        game_type: GameType,
        seats: Vec<SeatAssignment>,
    ) -> Result<MatchId, FetchError> {
        match self
            .request(|request_id| ClientMessage::CreateMatch { request_id, game_type, seats })
            .await?
        {
            ServerMessage::MatchCreated { match_id, .. } => Ok(match_id),
            other => Err(unexpected(&other)),
        }
    }

    /// Submit a command against `client_version`.
    pub async fn submit_action(
        &self,
        match_id: MatchId,
        client_version: u64,
        action: serde_json::Value,
    ) -> Result<Submission, FetchError> {
        match self
            .request(|request_id| ClientMessage::SubmitAction {
                request_id,
                match_id,
                client_version,
                action,
            })
            .await?
        {
            ServerMessage::ActionAccepted { new_version, summary, .. } => {
                Ok(Submission::Accepted { new_version, summary })
            }
            ServerMessage::ActionRejected { code, message, current_version, .. } => {
                Ok(Submission::Rejected { code, message, current_version })
            }
            other => Err(unexpected(&other)),
        }
    }
}

#[async_trait]
impl SnapshotSource for Connection {
    async fn fetch_snapshot(&self, match_id: MatchId) -> Result<Snapshot, FetchError> {
        self.snapshot_with_profiles(match_id).await.map(|(snapshot, _)| snapshot)
    }
}

fn unexpected(message: &ServerMessage) -> FetchError {
    FetchError::Rejected(format!("unexpected reply: {:?}", message))
}

fn reply_id(message: &ServerMessage) -> Option<u64> {
    match message {
        ServerMessage::MatchCreated { request_id, .. }
        | ServerMessage::Snapshot { request_id, .. }
        | ServerMessage::ActionAccepted { request_id, .. }
        | ServerMessage::ActionRejected { request_id, .. } => Some(*request_id),
        ServerMessage::Error { request_id, .. } => *request_id,
        _ => None,
    }
}

/// Why a live session ended.
enum LinkEnd {
    Lost,
    Closed,
}

async fn run(
    config: ConnectionConfig,
    mut outbound: mpsc::Receiver<Outbound>,
    signals: mpsc::Sender<TransportSignal>,
) {
    let mut subscriptions: BTreeSet<MatchId> = BTreeSet::new();
    let mut attempt: u32 = 0;
    let mut ever_connected = false;

    loop {
        match connect_async(config.url.as_str()).await {
            Ok((ws, _)) => {
                let reconnect = ever_connected;
                match session(&config, ws, &mut outbound, &signals, &mut subscriptions, reconnect).await {
                    Ok(end) => {
                        ever_connected = true;
                        attempt = 0;
                        let _ = signals.send(TransportSignal::Disconnected).await;
                        if let LinkEnd::Closed = end {
                            return;
                        }
                    }
                    Err(e) => warn!(url = %config.url, error = %e, "Connection setup failed"),
                }
            }
            Err(e) => debug!(url = %config.url, error = %e, "Connect failed"),
        }

        let delay = config.backoff(attempt);
        attempt = attempt.saturating_add(1);
        let wake = tokio::time::Instant::now() + delay;

        // Fail requests fast while down; keep the subscription set current
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(wake) => break,
                next = outbound.recv() => match next {
                    None => return,
                    Some(Outbound::Request { .. }) => {}
                    Some(Outbound::Fire(message)) => track(&mut subscriptions, &message),
                },
            }
        }
    }
}

fn track(subscriptions: &mut BTreeSet<MatchId>, message: &ClientMessage) {
    match message {
        ClientMessage::Subscribe { match_id } => {
            subscriptions.insert(*match_id);
        }
        ClientMessage::Unsubscribe { match_id } => {
            subscriptions.remove(match_id);
        }
        _ => {}
    }
}

/// Drive one connected socket. `Err` means the handshake never completed.
async fn session<W>(
    config: &ConnectionConfig,
    ws: W,
    outbound: &mut mpsc::Receiver<Outbound>,
    signals: &mpsc::Sender<TransportSignal>,
    subscriptions: &mut BTreeSet<MatchId>,
    reconnect: bool,
) -> Result<LinkEnd, String>
where
    W: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    let send = |message: &ClientMessage| message.to_json().map(Message::Text).map_err(|e| e.to_string());

    sink.send(send(&ClientMessage::Auth {
        token: config.token.clone(),
        client_version: config.client_version.clone(),
    })?)
    .await
    .map_err(|e| e.to_string())?;

    let auth = tokio::time::timeout(config.request_timeout, async {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Ok(ServerMessage::AuthResult { success, error, .. }) = ServerMessage::from_json(&text) {
                        return Ok((success, error));
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        Err("closed during auth".to_string())
    })
    .await
    .map_err(|_| "auth timed out".to_string())??;

    if !auth.0 {
        return Err(auth.1.unwrap_or_else(|| "auth refused".into()));
    }

    for match_id in subscriptions.iter() {
        sink.send(send(&ClientMessage::Subscribe { match_id: *match_id })?)
            .await
            .map_err(|e| e.to_string())?;
    }

    info!(url = %config.url, subscriptions = subscriptions.len(), reconnect, "Connected");
    if reconnect {
        let _ = signals.send(TransportSignal::Reconnected).await;
    }

    let mut pending: BTreeMap<u64, oneshot::Sender<ServerMessage>> = BTreeMap::new();

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(next) = next else {
                    let _ = sink.close().await;
                    return Ok(LinkEnd::Closed);
                };
                let message = match next {
                    Outbound::Request { request_id, message, reply } => {
                        pending.insert(request_id, reply);
                        message
                    }
                    Outbound::Fire(message) => {
                        track(subscriptions, &message);
                        message
                    }
                };
                let frame = match send(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize message");
                        continue;
                    }
                };
                if sink.send(frame).await.is_err() {
                    return Ok(LinkEnd::Lost);
                }
            }
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Ok(LinkEnd::Lost),
                    Some(Ok(_)) => continue,
                };
                let message = match ServerMessage::from_json(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        debug!(error = %e, "Unreadable server message");
                        continue;
                    }
                };
                match message {
                    ServerMessage::Event { event } => {
                        let _ = signals.send(TransportSignal::Event(event)).await;
                    }
                    ServerMessage::Shutdown { reason } => {
                        info!(reason = %reason, "Server shutting down");
                        return Ok(LinkEnd::Lost);
                    }
                    ServerMessage::Error { request_id: None, code, message } => {
                        debug!(?code, message = %message, "Server error");
                    }
                    other => {
                        if let Some(reply) = reply_id(&other).and_then(|id| pending.remove(&id)) {
                            let _ = reply.send(other);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::server::tests::spawn_server;
    use crate::sync::processor::tests::user;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn config(addr: SocketAddr, token: String) -> ConnectionConfig {
        ConnectionConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            request_timeout: Duration::from_secs(2),
            ..ConnectionConfig::new(format!("ws://{}", addr), token)
        }
    }

    async fn next_signal(rx: &mut mpsc::Receiver<TransportSignal>) -> TransportSignal {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no signal")
            .expect("signal channel closed")
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ConnectionConfig::new("ws://localhost:1", "t");
        assert_eq!(config.backoff(0), Duration::from_millis(250));
        assert_eq!(config.backoff(1), Duration::from_millis(500));
        assert_eq!(config.backoff(3), Duration::from_secs(2));
        assert_eq!(config.backoff(10), Duration::from_secs(10));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_round_trip_against_server() {
        let (_server, _processor, addr) = spawn_server().await;
        let (signal_tx, mut signals) = mpsc::channel(16);
        let (connection, _task) = Connection::spawn(config(addr, user(1).to_string()), signal_tx);

        // Retry until the handshake completes
        let mut created = None;
        for _ in 0..50 {
            match connection
                .create_match(GameType::Ludo, vec![SeatAssignment::Human(user(1)), SeatAssignment::Ai])
                .await
            {
                Ok(id) => {
                    created = Some(id);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        let match_id = created.expect("match created");

        connection.subscribe(match_id).await.unwrap();
        let (snapshot, profiles) = connection.snapshot_with_profiles(match_id).await.unwrap();
        assert_eq!(snapshot.record.version, 0);
        assert_eq!(profiles.len(), 1);

        let stale = connection
            .submit_action(match_id, 5, serde_json::json!({"kind": "start"}))
            .await
            .unwrap();
        assert!(matches!(
            stale,
            Submission::Rejected { code: ErrorCode::VersionConflict, current_version: Some(0), .. }
        ));

        let accepted = connection
            .submit_action(match_id, 0, serde_json::json!({"kind": "start"}))
            .await
            .unwrap();
        assert!(matches!(accepted, Submission::Accepted { new_version: 1, .. }));

        match next_signal(&mut signals).await {
            TransportSignal::Event(event) => assert_eq!(event.seq, 1),
            other => panic!("unexpected {:?}", other),
        }

        let fetched = connection.fetch_snapshot(match_id).await.unwrap();
        assert_eq!(fetched.record.version, 1);
    }

    /// Accepts a connection, answers auth, and returns the socket.
    async fn accept_authed(
        listener: &TcpListener,
    ) -> tokio_tungstenite::WebSocketStream<tokio::net::TcpStream> {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => {
                assert!(matches!(ClientMessage::from_json(&text).unwrap(), ClientMessage::Auth { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        let ok = ServerMessage::AuthResult {
            success: true,
            user_id: None,
            error: None,
            code: None,
            server_version: "test".into(),
        };
        ws.send(Message::Text(ok.to_json().unwrap())).await.unwrap();
        ws
    }

    #[tokio::test]
    async fn test_reconnect_resubscribes_and_signals() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (signal_tx, mut signals) = mpsc::channel(16);
        let (connection, _task) = Connection::spawn(config(addr, "t".into()), signal_tx);
        let match_id = MatchId::from_bytes([4; 16]);

        let mut first = accept_authed(&listener).await;
        connection.subscribe(match_id).await.unwrap();
        match first.next().await.unwrap().unwrap() {
            Message::Text(text) => assert_eq!(
                ClientMessage::from_json(&text).unwrap(),
                ClientMessage::Subscribe { match_id }
            ),
            other => panic!("unexpected {:?}", other),
        }

        // Drop the link
        drop(first);
        assert!(matches!(next_signal(&mut signals).await, TransportSignal::Disconnected));

        let mut second = accept_authed(&listener).await;
        match second.next().await.unwrap().unwrap() {
            Message::Text(text) => assert_eq!(
                ClientMessage::from_json(&text).unwrap(),
                ClientMessage::Subscribe { match_id }
            ),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(next_signal(&mut signals).await, TransportSignal::Reconnected));
    }

    #[tokio::test]
    async fn test_requests_fail_fast_while_down() {
        // Nothing listens here
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (signal_tx, _signals) = mpsc::channel(16);
        let (connection, task) = Connection::spawn(config(addr, "t".into()), signal_tx);
        let err = connection.fetch_snapshot(MatchId::from_bytes([1; 16])).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));

        drop(connection);
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }
}
