//! Action Processor
//!
//! The only writer of the Match State Store. Every externally callable
//! command (game actions and lifecycle commands alike) is:
//!
//! 1. checked against the caller's believed version,
//! 2. re-validated by the rules engine on a copy of the stored state,
//! 3. committed with `version + 1` and one event through the store's
//!    compare-and-swap.
//!
//! Rejections leave `(version, state)` untouched. A writer that loses the
//! compare-and-swap gets `VersionConflict` and must resync before retrying;
//! the server never retries on its behalf.

use std::sync::Arc;

use chrono::Utc;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::core::ids::{MatchId, SeatIndex, UserId};
use crate::core::rng::derive_match_seed;
use crate::services::{Notice, Notifier};
use crate::sync::engine::{Actor, CorruptState, RuleViolation, RulesEngine};
use crate::sync::event::{types, Event, EventPayload, EventType, MatchDelta};
use crate::sync::hub::EventHub;
use crate::sync::record::{
    MatchRecord, MatchStatus, SeatAssignment, SeatStatus, Snapshot,
};
use crate::sync::store::{MatchStore, StoreError};

// =============================================================================
// COMMANDS
// =============================================================================

/// A command submitted through the processor.
///
/// Wire form: `{"kind": "join", "args": {"seat": 1, "identity": "..."}}`,
/// game actions as `{"kind": "play", "args": <action>}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "args", rename_all = "snake_case")]
pub enum Command<A> {
    /// Pending -> active.
    Start,
    /// Take a seat.
    Join {
        /// Seat to take
        seat: SeatIndex,
        /// Joining user
        identity: UserId,
    },
    /// Leave a seat.
    Leave {
        /// Seat to vacate
        seat: SeatIndex,
    },
    /// Remove a seat's occupant.
    Kick {
        /// Seat to clear
        seat: SeatIndex,
    },
    /// Abandon the match.
    Cancel,
    /// Game action.
    Play(A),
}

/// Processor errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    /// Caller's version is stale (or lost a race). Resync and retry.
    #[error("version conflict: client has {expected}, current is {actual}")]
    VersionConflict {
        /// Version the caller submitted against
        expected: u64,
        /// Current version
        actual: u64,
    },

    /// Rejected by the rules.
    #[error("illegal action: {0}")]
    IllegalAction(#[from] RuleViolation),

    /// No such match.
    #[error("match {0} not found")]
    MatchNotFound(MatchId),

    /// Stored or computed state is corrupt; transaction aborted.
    #[error("corrupt state: {0}")]
    CorruptState(#[from] CorruptState),

    /// Store failure.
    #[error("store error: {0}")]
    Store(StoreError),

    /// Command payload did not decode.
    #[error("invalid command: {0}")]
    Decode(String),
}

impl From<StoreError> for ActionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ActionError::MatchNotFound(id),
            StoreError::VersionConflict { expected, actual } => {
                ActionError::VersionConflict { expected, actual }
            }
            other => ActionError::Store(other),
        }
    }
}

// =============================================================================
// PURE TRANSITION
// =============================================================================

/// Result of running a command against a record, before commit.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    /// Record to commit (version already bumped)
    pub record: MatchRecord,
    /// Event type
    pub event_type: EventType,
    /// Game delta
    pub delta: serde_json::Value,
    /// Match-level delta
    pub match_delta: MatchDelta,
    /// Human-readable result
    pub summary: String,
    /// Turn owner before
    pub turn_before: Option<SeatIndex>,
    /// Turn owner after
    pub turn_after: Option<SeatIndex>,
    /// Winner recorded by this command
    pub winner: Option<SeatIndex>,
}

fn require_host(record: &MatchRecord, actor: Actor) -> Result<(), RuleViolation> {
    let allowed = match actor {
        Actor::System => true,
        Actor::User(user) => record.host == Some(user),
        Actor::Seat(seat) => record
            .seat(seat)
            .map(|s| s.identity.is_some() && s.identity == record.host)
            .unwrap_or(false),
    };
    if allowed {
        Ok(())
    } else {
        Err(RuleViolation::NotPermitted)
    }
}

/// Run `command` against `record` without touching any store.
///
/// Used by the processor before commit and by replay.
pub fn process_command<R: RulesEngine>(
    engine: &R,
    record: &MatchRecord,
    actor: Actor,
    command: &Command<R::Action>,
) -> Result<Outcome, ActionError> {
    if record.status.is_terminal() {
        return Err(RuleViolation::WrongStatus(record.status).into());
    }

    let state = engine.decode_state(&record.state)?;
    engine.validate(&state)?;
    let turn_before = engine.current_seat(&state);

    let mut next = record.clone();
    next.version = record.version + 1;

    let (event_type, delta, match_delta, summary, winner) = match command {
        Command::Start => {
            require_host(record, actor)?;
            if record.status != MatchStatus::Pending {
                return Err(RuleViolation::WrongStatus(record.status).into());
            }
            let present = record.present_seats();
            let needed = engine.min_players();
            if present < needed {
                return Err(RuleViolation::NotEnoughPlayers { present, needed }.into());
            }
            next.status = MatchStatus::Active;
            (
                EventType::new(types::MATCH_STARTED),
                serde_json::Value::Null,
                MatchDelta::status(MatchStatus::Active),
                format!("match started with {} players", present),
                None,
            )
        }

        Command::Join { seat, identity } => {
            match actor {
                Actor::System => {}
                Actor::User(user) if user == *identity => {}
                _ => return Err(RuleViolation::NotPermitted.into()),
            }
            if let Some(taken) = record.roster.iter().find(|s| {
                s.identity == Some(*identity) && s.status == SeatStatus::Joined
            }) {
                return Err(RuleViolation::AlreadySeated(taken.index).into());
            }
            let slot = next
                .roster
                .get_mut(*seat as usize)
                .ok_or(RuleViolation::InvalidSeat(*seat))?;
            let open = !slot.is_ai
                && match slot.status {
                    SeatStatus::Pending => slot.identity.is_none() || slot.identity == Some(*identity),
                    SeatStatus::Left => true,
                    SeatStatus::Joined | SeatStatus::Kicked => false,
                };
            if !open {
                return Err(RuleViolation::SeatUnavailable(*seat).into());
            }
            slot.identity = Some(*identity);
            slot.status = SeatStatus::Joined;
            (
                EventType::new(types::SEAT_JOINED),
                serde_json::Value::Null,
                MatchDelta::seat(slot.clone()),
                format!("{} joined seat {}", identity, seat),
                None,
            )
        }

        Command::Leave { seat } => {
            match actor {
                Actor::System => {}
                Actor::Seat(s) if s == *seat => {}
                _ => return Err(RuleViolation::NotPermitted.into()),
            }
            let slot = next
                .roster
                .get_mut(*seat as usize)
                .ok_or(RuleViolation::InvalidSeat(*seat))?;
            if slot.is_ai || slot.status != SeatStatus::Joined {
                return Err(RuleViolation::NotSeated.into());
            }
            slot.status = SeatStatus::Left;
            (
                EventType::new(types::SEAT_LEFT),
                serde_json::Value::Null,
                MatchDelta::seat(slot.clone()),
                format!("seat {} left", seat),
                None,
            )
        }

        Command::Kick { seat } => {
            require_host(record, actor)?;
            let slot = next
                .roster
                .get_mut(*seat as usize)
                .ok_or(RuleViolation::InvalidSeat(*seat))?;
            if slot.is_ai || slot.identity.is_none() || slot.status == SeatStatus::Kicked {
                return Err(RuleViolation::SeatUnavailable(*seat).into());
            }
            slot.status = SeatStatus::Kicked;
            (
                EventType::new(types::SEAT_KICKED),
                serde_json::Value::Null,
                MatchDelta::seat(slot.clone()),
                format!("seat {} kicked", seat),
                None,
            )
        }

        Command::Cancel => {
            require_host(record, actor)?;
            next.status = MatchStatus::Cancelled;
            (
                EventType::new(types::MATCH_CANCELLED),
                serde_json::Value::Null,
                MatchDelta::status(MatchStatus::Cancelled),
                "match cancelled".to_string(),
                None,
            )
        }

        Command::Play(action) => {
            if record.status != MatchStatus::Active {
                return Err(RuleViolation::WrongStatus(record.status).into());
            }
            match actor {
                Actor::Seat(seat) => {
                    if !record.seat(seat).map(|s| s.is_present()).unwrap_or(false) {
                        return Err(RuleViolation::NotSeated.into());
                    }
                }
                Actor::User(_) => return Err(RuleViolation::NotSeated.into()),
                Actor::System => {}
            }

            let transition = engine.apply(&state, &record.roster, actor, action)?;
            engine.validate(&transition.state)?;
            next.state = engine.encode_state(&transition.state)?;

            let match_delta = if transition.winner.is_some() {
                next.status = MatchStatus::Completed;
                MatchDelta::status(MatchStatus::Completed)
            } else {
                MatchDelta::default()
            };
            (
                transition.event_type,
                transition.delta,
                match_delta,
                transition.summary,
                transition.winner,
            )
        }
    };

    let turn_after = match next.status {
        MatchStatus::Active => engine.current_seat(&engine.decode_state(&next.state)?),
        _ => None,
    };

    Ok(Outcome {
        record: next,
        event_type,
        delta,
        match_delta,
        summary,
        turn_before,
        turn_after,
        winner,
    })
}

// =============================================================================
// PROCESSOR
// =============================================================================

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Events included in a snapshot.
    pub recent_events: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { recent_events: 32 }
    }
}

/// How a new match is formed.
#[derive(Debug, Clone, Default)]
pub struct MatchSetup {
    /// Seat assignments; missing seats are open
    pub seats: Vec<SeatAssignment>,
    /// User allowed to start, kick and cancel
    pub host: Option<UserId>,
    /// Fixed dice seed (derived from fresh entropy when `None`)
    pub seed: Option<u64>,
}

/// Result of an accepted command.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    /// Version after commit
    pub new_version: u64,
    /// Human-readable result
    pub summary: String,
    /// Committed event
    pub event: Event,
}

/// The single write path to match state.
pub struct ActionProcessor<R: RulesEngine, S: MatchStore> {
    engine: Arc<R>,
    store: Arc<S>,
    hub: Arc<EventHub>,
    notifier: Arc<dyn Notifier>,
    config: ProcessorConfig,
}

impl<R: RulesEngine, S: MatchStore> ActionProcessor<R, S> {
    /// Create a processor.
    pub fn new(
        engine: Arc<R>,
        store: Arc<S>,
        hub: Arc<EventHub>,
        notifier: Arc<dyn Notifier>,
        config: ProcessorConfig,
    ) -> Self {
        Self { engine, store, hub, notifier, config }
    }

    /// Rules engine.
    pub fn engine(&self) -> &Arc<R> {
        &self.engine
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Event hub.
    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Form a new match at version 0, status pending.
    pub async fn create_match(&self, setup: MatchSetup) -> Result<MatchRecord, ActionError> {
        let seat_count = self.engine.seat_count();
        if setup.seats.len() > seat_count {
            return Err(RuleViolation::InvalidSeat(setup.seats.len() as SeatIndex).into());
        }

        let id = MatchId::new_v4();
        let seed = setup
            .seed
            .unwrap_or_else(|| derive_match_seed(&id, uuid::Uuid::new_v4().as_bytes()));

        let roster = (0..seat_count)
            .map(|i| {
                let index = i as SeatIndex;
                setup
                    .seats
                    .get(i)
                    .copied()
                    .unwrap_or(SeatAssignment::Open)
                    .into_seat(index, self.engine.seat_color(index))
            })
            .collect();

        let state = self.engine.initial_state(seed);
        let record = MatchRecord {
            id,
            game_type: self.engine.game_type(),
            status: MatchStatus::Pending,
            version: 0,
            state: self.engine.encode_state(&state)?,
            roster,
            host: setup.host,
        };

        self.store.insert(record.clone()).await?;
        info!(match_id = %id.short(), game = ?record.game_type, "Match created");
        Ok(record)
    }

    /// `submitAction`: run a command against the version the caller believes
    /// is current.
    #[instrument(skip(self, command), fields(match_id = %match_id.short()))]
    pub async fn submit(
        &self,
        match_id: MatchId,
        client_version: u64,
        actor: Actor,
        command: Command<R::Action>,
    ) -> Result<Committed, ActionError> {
        let record = self.store.load(match_id).await?;

        if client_version != record.version {
            debug!(client_version, current = record.version, "Stale version");
            return Err(ActionError::VersionConflict {
                expected: client_version,
                actual: record.version,
            });
        }

        let outcome = match process_command(self.engine.as_ref(), &record, actor, &command) {
            Ok(outcome) => outcome,
            Err(ActionError::CorruptState(e)) => {
                error!(error = %e, version = record.version, "Corrupt state, transaction aborted");
                return Err(ActionError::CorruptState(e));
            }
            Err(e) => {
                if matches!(actor, Actor::Seat(_)) {
                    warn!(?actor, error = %e, "Rejected");
                } else {
                    debug!(?actor, error = %e, "Rejected");
                }
                return Err(e);
            }
        };

        let event = Event {
            match_id,
            seq: outcome.record.version,
            event_type: outcome.event_type.clone(),
            payload: EventPayload {
                actor,
                command: serde_json::to_value(&command)
                    .map_err(|e| ActionError::Decode(e.to_string()))?,
                delta: outcome.delta.clone(),
                match_delta: outcome.match_delta.clone(),
                summary: outcome.summary.clone(),
            },
            acting_seat: actor.seat(),
            timestamp: Utc::now(),
        };

        if let Err(e) = self
            .store
            .commit(record.version, outcome.record.clone(), event.clone())
            .await
        {
            debug!(error = %e, "Commit lost");
            return Err(e.into());
        }

        debug!(
            version = event.seq,
            event_type = %event.event_type,
            "Committed"
        );
        #[cfg(feature = "debug-tracing")]
        if let Ok(state) = self.engine.decode_state(&outcome.record.state) {
            debug!(
                hash = %crate::core::hash::short_hex(&self.engine.state_hash(&state)),
                "State hash"
            );
        }

        self.hub.publish(&event).await;
        if outcome.record.status.is_terminal() {
            self.hub.close(match_id).await;
        }
        self.send_notices(&outcome);

        Ok(Committed {
            new_version: event.seq,
            summary: outcome.summary,
            event,
        })
    }

    /// Decode a JSON command and submit it.
    pub async fn submit_json(
        &self,
        match_id: MatchId,
        client_version: u64,
        actor: Actor,
        command: serde_json::Value,
    ) -> Result<Committed, ActionError> {
        let command: Command<R::Action> =
            serde_json::from_value(command).map_err(|e| ActionError::Decode(e.to_string()))?;
        self.submit(match_id, client_version, actor, command).await
    }

    /// `getSnapshot`: current record plus the tail of the log.
    pub async fn snapshot(&self, match_id: MatchId) -> Result<Snapshot, ActionError> {
        let record = self.store.load(match_id).await?;
        let mut recent_events = self
            .store
            .recent_events(match_id, self.config.recent_events)
            .await?;
        // A commit may land between the two reads
        recent_events.retain(|e| e.seq <= record.version);
        Ok(Snapshot { record, recent_events })
    }

    /// Events after `after_seq`.
    pub async fn events_since(&self, match_id: MatchId, after_seq: u64) -> Result<Vec<Event>, ActionError> {
        Ok(self.store.events_since(match_id, after_seq).await?)
    }

    fn send_notices(&self, outcome: &Outcome) {
        let record = &outcome.record;
        if let Some(seat) = outcome.turn_after {
            let handed_over = outcome.turn_before != Some(seat)
                || outcome.match_delta.status == Some(MatchStatus::Active);
            if let (true, Some(s)) = (handed_over, record.seat(seat)) {
                if let (true, Some(user)) = (s.is_human_joined(), s.identity) {
                    self.notifier.notify(Notice::YourTurn { match_id: record.id, seat, user });
                }
            }
        }
        if record.status == MatchStatus::Completed {
            self.notifier.notify(Notice::MatchCompleted {
                match_id: record.id,
                winner: outcome.winner,
            });
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::game::{LudoAction, LudoRules, LudoState};
    use crate::services::ChannelNotifier;
    use crate::sync::event::check_contiguous;
    use crate::sync::store::MemoryMatchStore;
    use tokio::sync::{broadcast, mpsc};

    pub(crate) type LudoProcessor = ActionProcessor<LudoRules, MemoryMatchStore>;

    pub(crate) fn user(byte: u8) -> UserId {
        UserId::from_bytes([byte; 16])
    }

    pub(crate) fn processor() -> (Arc<LudoProcessor>, mpsc::Receiver<Notice>) {
        let (notifier, rx) = ChannelNotifier::new(64);
        let processor = ActionProcessor::new(
            Arc::new(LudoRules),
            Arc::new(MemoryMatchStore::new()),
            Arc::new(EventHub::new(64)),
            Arc::new(notifier),
            ProcessorConfig::default(),
        );
        (Arc::new(processor), rx)
    }

    /// Active four-seat match: users 1 and 2 at seats 0 and 1, AI at 2 and 3.
    pub(crate) async fn active_match(processor: &LudoProcessor, seed: u64) -> MatchRecord {
        let record = processor
            .create_match(MatchSetup {
                seats: vec![
                    SeatAssignment::Human(user(1)),
                    SeatAssignment::Human(user(2)),
                    SeatAssignment::Ai,
                    SeatAssignment::Ai,
                ],
                host: Some(user(1)),
                seed: Some(seed),
            })
            .await
            .unwrap();
        processor
            .submit(record.id, 0, Actor::User(user(1)), Command::Start)
            .await
            .unwrap();
        processor.store().load(record.id).await.unwrap()
    }

    fn state_of(record: &MatchRecord) -> LudoState {
        serde_json::from_value(record.state.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_create_match_starts_pending_at_zero() {
        let (processor, _rx) = processor();
        let record = processor
            .create_match(MatchSetup { seats: vec![SeatAssignment::Human(user(1))], ..Default::default() })
            .await
            .unwrap();
        assert_eq!(record.version, 0);
        assert_eq!(record.status, MatchStatus::Pending);
        assert_eq!(record.roster.len(), 4);
        assert_eq!(record.roster[1].status, SeatStatus::Pending);

        let snapshot = processor.snapshot(record.id).await.unwrap();
        assert!(snapshot.recent_events.is_empty());
    }

    #[tokio::test]
    async fn test_version_monotonicity() {
        let (processor, _rx) = processor();
        let record = active_match(&processor, 7).await;
        let mut version = record.version;

        // Seed 7: seat 0 rolls 4 (no move, turn passes), seat 1 rolls 6
        let c = processor.submit(record.id, version, Actor::Seat(0), Command::Play(LudoAction::Roll)).await.unwrap();
        version = c.new_version;
        let c = processor.submit(record.id, version, Actor::Seat(1), Command::Play(LudoAction::Roll)).await.unwrap();
        version = c.new_version;
        let c = processor
            .submit(record.id, version, Actor::Seat(1), Command::Play(LudoAction::MoveToken { token_id: 4 }))
            .await
            .unwrap();
        version = c.new_version;

        assert_eq!(version, 4);
        let events = processor.events_since(record.id, 0).await.unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(check_contiguous(&events, 1), Ok(()));

        let stored = processor.store().load(record.id).await.unwrap();
        assert_eq!(stored.version, 4);
        assert_eq!(state_of(&stored).tokens[4].position, 0);
    }

    #[tokio::test]
    async fn test_conflict_rejection_leaves_state_unchanged() {
        let (processor, _rx) = processor();
        let record = active_match(&processor, 7).await;
        let before = processor.store().load(record.id).await.unwrap();

        let err = processor
            .submit(record.id, 0, Actor::Seat(0), Command::Play(LudoAction::Roll))
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::VersionConflict { expected: 0, actual: 1 });

        let err = processor
            .submit(record.id, 9, Actor::Seat(0), Command::Play(LudoAction::Roll))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::VersionConflict { .. }));

        assert_eq!(processor.store().load(record.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_illegal_action_leaves_state_unchanged() {
        let (processor, _rx) = processor();
        let record = active_match(&processor, 7).await;
        let before = processor.store().load(record.id).await.unwrap();

        let err = processor
            .submit(record.id, 1, Actor::Seat(1), Command::Play(LudoAction::Roll))
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::IllegalAction(RuleViolation::NotYourTurn { current: 0 }));

        let err = processor
            .submit(record.id, 1, Actor::User(user(9)), Command::Play(LudoAction::Roll))
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::IllegalAction(RuleViolation::NotSeated));

        assert_eq!(processor.store().load(record.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_serialize() {
        let (processor, _rx) = processor();
        let record = active_match(&processor, 7).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let processor = processor.clone();
            handles.push(tokio::spawn(async move {
                processor
                    .submit(record.id, 1, Actor::Seat(0), Command::Play(LudoAction::Roll))
                    .await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(ActionError::VersionConflict { .. }) => {}
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(processor.store().load(record.id).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_lifecycle_commands() {
        let (processor, _rx) = processor();
        let record = processor
            .create_match(MatchSetup {
                seats: vec![SeatAssignment::Human(user(1)), SeatAssignment::Invited(user(2))],
                host: Some(user(1)),
                seed: Some(1),
            })
            .await
            .unwrap();
        let id = record.id;

        // Not enough players yet
        let err = processor.submit(id, 0, Actor::User(user(1)), Command::Start).await.unwrap_err();
        assert_eq!(err, ActionError::IllegalAction(RuleViolation::NotEnoughPlayers { present: 1, needed: 2 }));

        // Invited seat is reserved
        let err = processor
            .submit(id, 0, Actor::User(user(3)), Command::Join { seat: 1, identity: user(3) })
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::IllegalAction(RuleViolation::SeatUnavailable(1)));

        // Joining on someone else's behalf
        let err = processor
            .submit(id, 0, Actor::User(user(3)), Command::Join { seat: 2, identity: user(4) })
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::IllegalAction(RuleViolation::NotPermitted));

        let c = processor
            .submit(id, 0, Actor::User(user(2)), Command::Join { seat: 1, identity: user(2) })
            .await
            .unwrap();
        assert_eq!(c.event.event_type, types::SEAT_JOINED);
        assert_eq!(c.event.payload.match_delta.seat.as_ref().map(|s| s.status), Some(SeatStatus::Joined));

        // Only the host starts
        let err = processor.submit(id, 1, Actor::User(user(2)), Command::Start).await.unwrap_err();
        assert_eq!(err, ActionError::IllegalAction(RuleViolation::NotPermitted));
        processor.submit(id, 1, Actor::Seat(0), Command::Start).await.unwrap();

        processor.submit(id, 2, Actor::Seat(1), Command::Leave { seat: 1 }).await.unwrap();
        let record = processor.store().load(id).await.unwrap();
        assert_eq!(record.roster[1].status, SeatStatus::Left);

        processor.submit(id, 3, Actor::System, Command::Kick { seat: 1 }).await.unwrap();
        processor.submit(id, 4, Actor::User(user(1)), Command::Cancel).await.unwrap();

        let record = processor.store().load(id).await.unwrap();
        assert_eq!(record.status, MatchStatus::Cancelled);
        assert_eq!(record.version, 5);

        let err = processor.submit(id, 5, Actor::System, Command::Start).await.unwrap_err();
        assert_eq!(err, ActionError::IllegalAction(RuleViolation::WrongStatus(MatchStatus::Cancelled)));
    }

    #[tokio::test]
    async fn test_play_requires_active_match() {
        let (processor, _rx) = processor();
        let record = processor
            .create_match(MatchSetup { seats: vec![SeatAssignment::Ai; 4], ..Default::default() })
            .await
            .unwrap();
        let err = processor
            .submit(record.id, 0, Actor::Seat(0), Command::Play(LudoAction::Roll))
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::IllegalAction(RuleViolation::WrongStatus(MatchStatus::Pending)));
    }

    #[tokio::test]
    async fn test_corrupt_state_aborts() {
        let (processor, _rx) = processor();
        let record = active_match(&processor, 7).await;

        let mut broken = record.clone();
        let mut state = state_of(&broken);
        state.tokens.truncate(3);
        broken.state = serde_json::to_value(&state).unwrap();
        processor.store().corrupt(broken.clone()).await;

        let err = processor
            .submit(record.id, 1, Actor::Seat(0), Command::Play(LudoAction::Roll))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::CorruptState(CorruptState::TokenCount { .. })));
        assert_eq!(processor.store().load(record.id).await.unwrap(), broken);
    }

    #[tokio::test]
    async fn test_submit_json_decodes_wire_commands() {
        let (processor, _rx) = processor();
        let record = active_match(&processor, 7).await;

        let c = processor
            .submit_json(
                record.id,
                1,
                Actor::Seat(0),
                serde_json::json!({"kind": "play", "args": {"kind": "roll"}}),
            )
            .await
            .unwrap();
        assert_eq!(c.new_version, 2);

        let err = processor
            .submit_json(record.id, 2, Actor::Seat(1), serde_json::json!({"kind": "fly"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Decode(_)));
    }

    #[tokio::test]
    async fn test_turn_notice_for_human_seat() {
        let (processor, mut rx) = processor();
        let record = active_match(&processor, 7).await;

        // Start hands the turn to user 1 at seat 0
        assert_eq!(
            rx.recv().await,
            Some(Notice::YourTurn { match_id: record.id, seat: 0, user: user(1) })
        );

        // Seat 0 rolls 4 with no move: turn passes to user 2
        processor
            .submit(record.id, 1, Actor::Seat(0), Command::Play(LudoAction::Roll))
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(Notice::YourTurn { match_id: record.id, seat: 1, user: user(2) })
        );
    }

    #[tokio::test]
    async fn test_commits_are_published() {
        let (processor, _rx) = processor();
        let record = active_match(&processor, 7).await;
        let mut events = processor.hub().subscribe(record.id).await;

        processor
            .submit(record.id, 1, Actor::Seat(0), Command::Play(LudoAction::Roll))
            .await
            .unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.seq, 2);
        assert_eq!(event.acting_seat, Some(0));
        assert_eq!(event.payload.actor, Actor::Seat(0));
    }

    #[tokio::test]
    async fn test_terminal_commit_closes_channel() {
        let (processor, _rx) = processor();
        let record = active_match(&processor, 7).await;
        let mut events = processor.hub().subscribe(record.id).await;
        assert_eq!(processor.hub().open_channels().await, 1);

        processor
            .submit(record.id, 1, Actor::User(user(1)), Command::Cancel)
            .await
            .unwrap();
        assert_eq!(processor.hub().open_channels().await, 0);

        // The final event is still delivered before the channel ends
        let event = events.recv().await.unwrap();
        assert_eq!(event.payload.match_delta.status, Some(MatchStatus::Cancelled));
        assert!(matches!(events.recv().await, Err(broadcast::error::RecvError::Closed)));
    }
}
