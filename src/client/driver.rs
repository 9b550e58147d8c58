//! Sync Driver
//!
//! Async shell around `SyncAgent`. Feeds it transport signals, performs the
//! snapshot fetches it asks for, and publishes a `SyncView` on a watch
//! channel. Fetches run on their own task so a slow server never blocks
//! event handling, and a failed fetch is retried after `retry_delay`.
//!
//! At most one fetch per agent epoch is in flight. A reconnect opens a new
//! epoch, so its fetch starts at once even if an older one is still pending;
//! the older result is then refused by the agent.
//!
//! Pushes are only a liveness optimization: if nothing arrives for
//! `poll_interval`, the driver polls a snapshot anyway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::agent::{Directive, Phase, SyncAgent};
use crate::core::ids::MatchId;
use crate::sync::engine::RulesEngine;
use crate::sync::event::Event;
use crate::sync::record::{MatchStatus, Seat, Snapshot};

/// Input from the push transport.
#[derive(Debug, Clone)]
pub enum TransportSignal {
    /// An event was pushed.
    Event(Event),
    /// Transport dropped.
    Disconnected,
    /// Transport recovered.
    Reconnected,
    /// A submission was rejected with a version conflict.
    Conflict,
}

/// Snapshot fetch failure.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Transport unavailable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Server answered with an error.
    #[error("rejected: {0}")]
    Rejected(String),

    /// No answer in time.
    #[error("timed out")]
    Timeout,
}

/// Where snapshots come from.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// Fetch the authoritative snapshot of a match.
    async fn fetch_snapshot(&self, match_id: MatchId) -> Result<Snapshot, FetchError>;
}

/// What the UI renders.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncView<S> {
    /// Agent phase
    pub phase: Phase,
    /// Version to submit against
    pub version: u64,
    /// Transport up?
    pub connected: bool,
    /// Viewer owns the turn?
    pub is_my_turn: bool,
    /// Brief "syncing" indicator
    pub syncing: bool,
    /// Match status
    pub status: Option<MatchStatus>,
    /// Roster
    pub roster: Vec<Seat>,
    /// Game state
    pub state: Option<S>,
}

impl<S> Default for SyncView<S> {
    fn default() -> Self {
        Self {
            phase: Phase::Loading,
            version: 0,
            connected: false,
            is_my_turn: false,
            syncing: true,
            status: None,
            roster: Vec::new(),
            state: None,
        }
    }
}

/// Driver timing.
#[derive(Debug, Clone)]
pub struct SyncDriverConfig {
    /// Delay before retrying a failed fetch.
    pub retry_delay: Duration,
    /// Poll a snapshot after this long without pushes.
    pub poll_interval: Duration,
}

impl Default for SyncDriverConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            poll_interval: Duration::from_secs(15),
        }
    }
}

/// Runs one `SyncAgent`.
pub struct SyncDriver<R: RulesEngine, F: SnapshotSource> {
    agent: SyncAgent<R>,
    source: Arc<F>,
    config: SyncDriverConfig,
}

impl<R: RulesEngine, F: SnapshotSource> SyncDriver<R, F> {
    /// Create a driver around an agent.
    pub fn new(agent: SyncAgent<R>, source: Arc<F>, config: SyncDriverConfig) -> Self {
        Self { agent, source, config }
    }

    fn view(&self) -> SyncView<R::State> {
        SyncView {
            phase: self.agent.phase(),
            version: self.agent.version(),
            connected: self.agent.is_connected(),
            is_my_turn: self.agent.is_my_turn(),
            syncing: self.agent.needs_snapshot(),
            status: self.agent.status(),
            roster: self.agent.roster().to_vec(),
            state: self.agent.state().cloned(),
        }
    }

    /// Run until the signal channel closes or `shutdown` fires.
    ///
    /// Returns the agent, closed.
    pub async fn run(
        mut self,
        mut signals: mpsc::Receiver<TransportSignal>,
        view: watch::Sender<SyncView<R::State>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> SyncAgent<R> {
        let match_id = self.agent.match_id();
        let (result_tx, mut results) = mpsc::channel::<(u64, Result<Snapshot, FetchError>)>(4);

        let mut in_flight: Option<u64> = None;
        let mut retry_at: Option<Instant> = None;
        let mut poll_at = Instant::now() + self.config.poll_interval;
        let mut directive = self.agent.start();

        loop {
            let epoch = self.agent.fetch_epoch();
            if directive == Directive::FetchSnapshot && in_flight != Some(epoch) {
                in_flight = Some(epoch);
                retry_at = None;
                let source = self.source.clone();
                let tx = result_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send((epoch, source.fetch_snapshot(match_id).await)).await;
                });
            }
            directive = Directive::None;
            let _ = view.send(self.view());

            tokio::select! {
                signal = signals.recv() => {
                    let Some(signal) = signal else { break };
                    directive = match signal {
                        TransportSignal::Event(event) => {
                            poll_at = Instant::now() + self.config.poll_interval;
                            self.agent.on_event(&event)
                        }
                        TransportSignal::Disconnected => {
                            self.agent.on_disconnect();
                            Directive::None
                        }
                        TransportSignal::Reconnected => self.agent.on_reconnect(),
                        TransportSignal::Conflict => self.agent.poll(),
                    };
                }
                Some((epoch, result)) = results.recv() => {
                    if in_flight == Some(epoch) {
                        in_flight = None;
                    }
                    match result {
                        _ if epoch != self.agent.fetch_epoch() => {
                            debug!(match_id = %match_id.short(), epoch, "Stale fetch dropped");
                            directive = self.agent.on_stale_fetch();
                        }
                        Ok(snapshot) => match self.agent.on_fetched(epoch, snapshot) {
                            Ok(next) => {
                                poll_at = Instant::now() + self.config.poll_interval;
                                directive = next;
                            }
                            Err(e) => {
                                warn!(match_id = %match_id.short(), error = %e, "Snapshot refused");
                                retry_at = Some(Instant::now() + self.config.retry_delay);
                            }
                        },
                        Err(e) => {
                            debug!(match_id = %match_id.short(), error = %e, "Snapshot fetch failed");
                            if self.agent.on_fetch_failed() == Directive::FetchSnapshot {
                                retry_at = Some(Instant::now() + self.config.retry_delay);
                            }
                        }
                    }
                }
                _ = tokio::time::sleep_until(retry_at.unwrap_or(poll_at)), if retry_at.is_some() => {
                    directive = Directive::FetchSnapshot;
                }
                _ = tokio::time::sleep_until(poll_at), if retry_at.is_none() && in_flight.is_none() => {
                    poll_at = Instant::now() + self.config.poll_interval;
                    directive = self.agent.poll();
                }
                _ = shutdown.recv() => break,
            }
        }

        self.agent.close();
        let _ = view.send(self.view());
        self.agent
    }
}
