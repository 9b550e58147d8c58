//! Turn Driver
//!
//! Server-side trigger for turns nobody else will take: AI seats and seats
//! whose occupant is absent. It reacts to committed events and also sweeps
//! open matches periodically, so a dropped broadcast never stalls a match.
//!
//! Every action it takes goes through `ActionProcessor::submit` with the
//! version it just read. If another driver instance acts first, the loser
//! gets `VersionConflict` and drops the attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::ids::MatchId;
use crate::sync::engine::{Actor, RulesEngine};
use crate::sync::processor::{ActionError, ActionProcessor, Command};
use crate::sync::record::MatchStatus;
use crate::sync::store::MatchStore;

/// Turn driver configuration.
#[derive(Debug, Clone)]
pub struct TurnDriverConfig {
    /// Pause before an AI acts, so viewers can follow.
    pub ai_move_delay: Duration,
    /// Interval between sweeps of open matches.
    pub sweep_interval: Duration,
}

impl Default for TurnDriverConfig {
    fn default() -> Self {
        Self {
            ai_move_delay: Duration::from_millis(400),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// What the driver did for one match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Nothing to do: a present human owns the turn, or the match is not active.
    Idle,
    /// Submitted an AI action.
    AiActed,
    /// Skipped an absent seat.
    SkippedAbsent,
    /// Lost a race to another writer.
    Conflict,
}

/// Drives AI and absent-seat turns.
pub struct TurnDriver<R: RulesEngine, S: MatchStore> {
    processor: Arc<ActionProcessor<R, S>>,
    config: TurnDriverConfig,
}

impl<R: RulesEngine, S: MatchStore> TurnDriver<R, S> {
    /// Create a driver.
    pub fn new(processor: Arc<ActionProcessor<R, S>>, config: TurnDriverConfig) -> Self {
        Self { processor, config }
    }

    /// Take at most one action for a match.
    pub async fn drive(&self, match_id: MatchId) -> Result<DriveOutcome, ActionError> {
        let record = self.processor.store().load(match_id).await?;
        if record.status != MatchStatus::Active {
            return Ok(DriveOutcome::Idle);
        }

        let engine = self.processor.engine();
        let state = engine.decode_state(&record.state)?;
        let Some(seat) = engine.current_seat(&state) else {
            return Ok(DriveOutcome::Idle);
        };
        let Some(slot) = record.seat(seat) else {
            return Ok(DriveOutcome::Idle);
        };

        let (actor, action, outcome) = if slot.is_ai {
            let Some(action) = engine.ai_action(&state, seat) else {
                return Ok(DriveOutcome::Idle);
            };
            if !self.config.ai_move_delay.is_zero() {
                tokio::time::sleep(self.config.ai_move_delay).await;
            }
            (Actor::Seat(seat), action, DriveOutcome::AiActed)
        } else if !slot.is_present() {
            let Some(action) = engine.absent_seat_action() else {
                return Ok(DriveOutcome::Idle);
            };
            (Actor::System, action, DriveOutcome::SkippedAbsent)
        } else {
            return Ok(DriveOutcome::Idle);
        };

        match self
            .processor
            .submit(match_id, record.version, actor, Command::Play(action))
            .await
        {
            Ok(_) => Ok(outcome),
            Err(ActionError::VersionConflict { .. }) => {
                debug!(match_id = %match_id.short(), "Turn already taken");
                Ok(DriveOutcome::Conflict)
            }
            Err(e) => Err(e),
        }
    }

    /// Drive every open match once.
    pub async fn sweep(&self) -> usize {
        let open = match self.processor.store().list_open().await {
            Ok(open) => open,
            Err(e) => {
                warn!(error = %e, "Sweep failed to list matches");
                return 0;
            }
        };

        let mut acted = 0;
        for match_id in open {
            match self.drive(match_id).await {
                Ok(DriveOutcome::AiActed | DriveOutcome::SkippedAbsent) => acted += 1,
                Ok(_) => {}
                Err(e) => warn!(match_id = %match_id.short(), error = %e, "Drive failed"),
            }
        }
        acted
    }

    /// Run until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut events = self.processor.hub().subscribe_all();
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            ai_delay_ms = self.config.ai_move_delay.as_millis() as u64,
            sweep_secs = self.config.sweep_interval.as_secs(),
            "Turn driver started"
        );

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        let driver = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = driver.drive(event.match_id).await {
                                warn!(match_id = %event.match_id.short(), error = %e, "Drive failed");
                            }
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Turn driver lagged, sweep will catch up");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = sweep.tick() => {
                    let acted = self.sweep().await;
                    let pruned = self.processor.hub().prune().await;
                    if acted > 0 || pruned > 0 {
                        debug!(acted, pruned, "Sweep");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        info!("Turn driver stopped");
    }
}
