//! Ludo Events
//!
//! Declared deltas recorded with each committed Ludo transition, and the
//! client-side patching that applies them to a cached state.
//!
//! Dice and skip deltas are complete, and so is a move that captured
//! nothing. Capture victims are not named, so after a capturing move a viewer
//! patches what it can and then resnapshots.

use serde::{Serialize, Deserialize};

use crate::core::ids::SeatIndex;
use crate::core::rng::DeterministicRng;
use crate::game::action::SkipReason;
use crate::game::state::{LudoState, TokenId};
use crate::sync::engine::DeltaOutcome;
use crate::sync::event::EventType;

/// Dice were rolled.
pub const DICE_ROLLED: &str = "dice_rolled";
/// A token moved.
pub const TOKEN_MOVED: &str = "token_moved";
/// A turn was skipped.
pub const TURN_SKIPPED: &str = "turn_skipped";

/// Per-event-type patch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LudoDelta {
    /// Dice rolled; `pending` is `None` when the roll had no legal move.
    DiceRolled {
        /// Seat that rolled
        seat: SeatIndex,
        /// Face rolled
        value: u8,
        /// Dice value left pending
        pending: Option<u8>,
        /// Turn owner after the roll
        next_seat: SeatIndex,
        /// Generator after the roll
        rng: DeterministicRng,
    },
    /// A token moved.
    TokenMoved {
        /// Mover
        seat: SeatIndex,
        /// Token moved
        token_id: TokenId,
        /// Position before
        from: i8,
        /// Position after
        to: i8,
        /// Number of opposing tokens sent to base
        captures: u8,
        /// Turn owner after the move
        next_seat: SeatIndex,
        /// Winner, if this move finished the game
        winner: Option<SeatIndex>,
    },
    /// A turn was skipped.
    TurnSkipped {
        /// Seat whose turn was skipped
        seat: SeatIndex,
        /// Why
        reason: SkipReason,
        /// Turn owner after the skip
        next_seat: SeatIndex,
    },
}

impl LudoDelta {
    /// Event type this delta is recorded under.
    pub fn event_type(&self) -> EventType {
        EventType::new(match self {
            LudoDelta::DiceRolled { .. } => DICE_ROLLED,
            LudoDelta::TokenMoved { .. } => TOKEN_MOVED,
            LudoDelta::TurnSkipped { .. } => TURN_SKIPPED,
        })
    }

    /// Encode for the event payload.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Patch a cached state with a declared delta.
pub fn apply_delta(
    state: &mut LudoState,
    event_type: &EventType,
    delta: &serde_json::Value,
) -> DeltaOutcome {
    let delta: LudoDelta = match serde_json::from_value(delta.clone()) {
        Ok(delta) => delta,
        Err(_) => return DeltaOutcome::NeedsSnapshot,
    };
    if &delta.event_type() != event_type {
        return DeltaOutcome::NeedsSnapshot;
    }

    match delta {
        LudoDelta::DiceRolled { pending, next_seat, rng, .. } => {
            state.dice = pending;
            state.current_seat = next_seat;
            state.rng = rng;
            DeltaOutcome::Applied
        }
        LudoDelta::TurnSkipped { next_seat, .. } => {
            state.dice = None;
            state.current_seat = next_seat;
            DeltaOutcome::Applied
        }
        LudoDelta::TokenMoved { token_id, from, to, captures, next_seat, winner, .. } => {
            let Some(token) = state.tokens.get_mut(token_id as usize) else {
                return DeltaOutcome::NeedsSnapshot;
            };
            if token.position != from {
                return DeltaOutcome::NeedsSnapshot;
            }
            token.position = to;
            state.dice = None;
            state.current_seat = next_seat;
            state.winner = winner;
            if captures == 0 {
                DeltaOutcome::Applied
            } else {
                DeltaOutcome::NeedsSnapshot
            }
        }
    }
}
