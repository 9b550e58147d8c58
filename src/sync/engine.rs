//! Rules Engine capability
//!
//! The sync core (processor, store, event log, client agent) is generic over
//! one `RulesEngine` per game type. The engine is pure: given the same state,
//! roster, actor and action it always returns the same transition, which is
//! what makes replaying the event log valid.

use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize, Deserialize};
use thiserror::Error;

use crate::core::hash::StateHash;
use crate::core::ids::{SeatIndex, UserId};
use crate::sync::event::EventType;
use crate::sync::record::{GameType, MatchStatus, Seat, SeatColor};

/// Who issued a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// The occupant of a seat (human or AI).
    Seat(SeatIndex),
    /// An authenticated user without a seat (joining).
    User(UserId),
    /// The server itself (idle-seat rule, timeouts, admin).
    System,
}

impl Actor {
    /// Seat index if the actor is a seat.
    pub fn seat(&self) -> Option<SeatIndex> {
        match self {
            Actor::Seat(seat) => Some(*seat),
            _ => None,
        }
    }
}

/// Why a command was rejected. Surfaced to callers as `IllegalAction`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleViolation {
    /// Acting seat does not own the turn.
    #[error("not your turn (current seat {current})")]
    NotYourTurn {
        /// Seat owning the turn
        current: SeatIndex,
    },

    /// Moving requires a pending dice value.
    #[error("dice not rolled")]
    DiceNotRolled,

    /// A dice value is already pending; move it first.
    #[error("dice already rolled ({0})")]
    DiceAlreadyRolled(u8),

    /// Token id does not exist.
    #[error("unknown token {0}")]
    UnknownToken(u8),

    /// Token belongs to another seat.
    #[error("token {0} is not yours")]
    NotYourToken(u8),

    /// Token has no legal move for the pending dice value.
    #[error("token {token} cannot move {dice}")]
    TokenCannotMove {
        /// Token id
        token: u8,
        /// Pending dice value
        dice: u8,
    },

    /// Idle-seat rule invoked while the seat is present.
    #[error("seat {0} is present")]
    SeatPresent(SeatIndex),

    /// Game already has a winner.
    #[error("game over")]
    GameOver,

    /// Actor has no playing seat in this match.
    #[error("actor is not seated")]
    NotSeated,

    /// Command not accepted in this match status.
    #[error("match is {0:?}")]
    WrongStatus(MatchStatus),

    /// Seat index out of range.
    #[error("invalid seat {0}")]
    InvalidSeat(SeatIndex),

    /// Seat cannot be taken.
    #[error("seat {0} is not available")]
    SeatUnavailable(SeatIndex),

    /// User already holds a seat in this match.
    #[error("already seated at {0}")]
    AlreadySeated(SeatIndex),

    /// Actor is not allowed to issue this command.
    #[error("not permitted")]
    NotPermitted,

    /// Too few seats present to start.
    #[error("need {needed} players, have {present}")]
    NotEnoughPlayers {
        /// Seats present
        present: usize,
        /// Minimum required
        needed: usize,
    },
}

/// Persisted state violates a structural invariant.
///
/// Fatal: the offending transaction is aborted, never committed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptState {
    /// Payload does not decode as the game's state type.
    #[error("malformed state payload: {0}")]
    Malformed(String),

    /// Wrong number of tokens.
    #[error("expected {expected} tokens, found {actual}")]
    TokenCount {
        /// Expected count
        expected: usize,
        /// Actual count
        actual: usize,
    },

    /// Token id or owner out of place.
    #[error("token at index {0} has the wrong id or owner")]
    TokenIdentity(usize),

    /// Token position outside {-1} ∪ [0, 58].
    #[error("token {token} at invalid position {position}")]
    PositionOutOfRange {
        /// Token id
        token: u8,
        /// Stored position
        position: i8,
    },

    /// Current seat outside the roster.
    #[error("current seat {0} out of range")]
    SeatOutOfRange(SeatIndex),

    /// Pending dice outside 1..=6.
    #[error("invalid pending dice {0}")]
    InvalidDice(u8),

    /// Recorded winner disagrees with token positions.
    #[error("winner inconsistent with token positions")]
    WinnerMismatch,
}

/// Result of a legal command.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<S> {
    /// Next state
    pub state: S,
    /// Event type to record
    pub event_type: EventType,
    /// Declared delta clients may patch their cache with
    pub delta: serde_json::Value,
    /// Human-readable result
    pub summary: String,
    /// Seat that won with this transition
    pub winner: Option<SeatIndex>,
}

/// Outcome of patching a cached state with an event's declared delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Cached state now matches the authoritative one.
    Applied,
    /// Delta is partial; fetch a full snapshot.
    NeedsSnapshot,
}

/// Per-game-type rules, plugged into the sync core.
///
/// Implementations must be deterministic and side-effect free.
pub trait RulesEngine: Send + Sync + 'static {
    /// Game state payload stored in `MatchRecord::state`.
    type State: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Game actions (`Command::Play`).
    type Action: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Game type served.
    fn game_type(&self) -> GameType;

    /// Fixed roster size.
    fn seat_count(&self) -> usize;

    /// Minimum present seats required to start.
    fn min_players(&self) -> usize {
        2
    }

    /// Fixed color of a seat.
    fn seat_color(&self, seat: SeatIndex) -> SeatColor;

    /// State at version 0.
    fn initial_state(&self, seed: u64) -> Self::State;

    /// Seat owning the turn, `None` once the game is over.
    fn current_seat(&self, state: &Self::State) -> Option<SeatIndex>;

    /// Apply an action. Never mutates `state`.
    fn apply(
        &self,
        state: &Self::State,
        roster: &[Seat],
        actor: Actor,
        action: &Self::Action,
    ) -> Result<Transition<Self::State>, RuleViolation>;

    /// Structural invariants.
    fn validate(&self, state: &Self::State) -> Result<(), CorruptState>;

    /// Patch a cached state with an event's declared delta.
    fn apply_delta(
        &self,
        state: &mut Self::State,
        event_type: &EventType,
        delta: &serde_json::Value,
    ) -> DeltaOutcome;

    /// Bit-exact state digest.
    fn state_hash(&self, state: &Self::State) -> StateHash;

    /// Action the AI takes for `seat`, if it owns the turn.
    fn ai_action(&self, state: &Self::State, seat: SeatIndex) -> Option<Self::Action>;

    /// Action the server submits when the turn sits with an absent seat.
    fn absent_seat_action(&self) -> Option<Self::Action>;

    /// Decode a stored payload.
    fn decode_state(&self, payload: &serde_json::Value) -> Result<Self::State, CorruptState> {
        serde_json::from_value(payload.clone()).map_err(|e| CorruptState::Malformed(e.to_string()))
    }

    /// Encode a state for storage.
    fn encode_state(&self, state: &Self::State) -> Result<serde_json::Value, CorruptState> {
        serde_json::to_value(state).map_err(|e| CorruptState::Malformed(e.to_string()))
    }
}
