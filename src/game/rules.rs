//! Ludo Rules Engine
//!
//! Pure functions over `(state, action)`. Nothing here mutates its input:
//! every function works on a copy and returns the next state.
//!
//! # Determinism
//!
//! - Dice come from the generator stored in the state
//! - Tokens are always scanned in id order
//! - No system calls, no clocks

use crate::core::hash::StateHash;
use crate::core::ids::SeatIndex;
use crate::game::action::{LudoAction, SkipReason};
use crate::game::ai::choose_move;
use crate::game::board::{
    self, compute_next_position, next_seat, path_cells, SEAT_COUNT, SPAWN_ROLL,
};
use crate::game::events::{self, LudoDelta};
use crate::game::state::{LudoState, TokenId};
use crate::sync::engine::{
    Actor, CorruptState, DeltaOutcome, RuleViolation, RulesEngine, Transition,
};
use crate::sync::event::EventType;
use crate::sync::record::{GameType, Seat, SeatColor};

// =============================================================================
// MOVE GENERATION
// =============================================================================

/// Tokens `seat` may move with `dice`, in id order.
///
/// A token is movable when it can spawn (in base on a 6) or advance without
/// overshooting the finish, and no cell it passes or lands on is a blockade.
pub fn legal_moves(state: &LudoState, seat: SeatIndex, dice: u8) -> Vec<TokenId> {
    state
        .tokens_of(seat)
        .filter(|token| {
            let Some(to) = compute_next_position(token.position, dice) else {
                return false;
            };
            path_cells(seat, token.position, to)
                .into_iter()
                .all(|cell| !state.is_blockade(cell, seat))
        })
        .map(|token| token.id)
        .collect()
}

/// Result of a single token move.
#[derive(Clone, Debug, PartialEq)]
pub struct MoveOutcome {
    /// State after the move
    pub state: LudoState,
    /// Position before
    pub from: i8,
    /// Position after
    pub to: i8,
    /// Opposing tokens sent back to base
    pub captured: Vec<TokenId>,
    /// Set when the mover brought its last token home
    pub winner: Option<SeatIndex>,
}

/// Move a token of the current seat by `dice` pips.
///
/// Captures every opposing token on a non-safe landing cell. The turn passes
/// to the next seat unless a 6 was rolled.
pub fn apply_move(
    state: &LudoState,
    token_id: TokenId,
    dice: u8,
) -> Result<MoveOutcome, RuleViolation> {
    let seat = state.current_seat;
    let token = state.token(token_id).ok_or(RuleViolation::UnknownToken(token_id))?;
    if token.owner != seat {
        return Err(RuleViolation::NotYourToken(token_id));
    }
    if !legal_moves(state, seat, dice).contains(&token_id) {
        return Err(RuleViolation::TokenCannotMove { token: token_id, dice });
    }

    let from = token.position;
    let to = compute_next_position(from, dice)
        .ok_or(RuleViolation::TokenCannotMove { token: token_id, dice })?;

    let mut next = state.clone();
    next.tokens[token_id as usize].position = to;

    // Capture check only applies on the shared track
    let mut captured = Vec::new();
    if let Some(cell) = board::global_cell(seat, to).filter(|c| !board::is_safe(*c)) {
        for victim in next.tokens.iter_mut() {
            if victim.owner != seat && victim.global_cell() == Some(cell) {
                victim.position = board::BASE;
                captured.push(victim.id);
            }
        }
    }

    let winner = next.has_finished(seat).then_some(seat);
    next.winner = winner;
    next.dice = None;
    if dice != SPAWN_ROLL {
        next.current_seat = next_seat(seat);
    }

    Ok(MoveOutcome { state: next, from, to, captured, winner })
}

/// Result of a roll.
#[derive(Clone, Debug, PartialEq)]
pub struct RollOutcome {
    /// State after the roll
    pub state: LudoState,
    /// Face rolled
    pub value: u8,
    /// Tokens that may move; empty means the turn was passed
    pub movable: Vec<TokenId>,
}

/// Roll the die for the current seat.
///
/// A roll with no legal move passes the turn immediately.
pub fn roll_dice(state: &LudoState) -> Result<RollOutcome, RuleViolation> {
    if let Some(pending) = state.dice {
        return Err(RuleViolation::DiceAlreadyRolled(pending));
    }

    let mut next = state.clone();
    let value = next.rng.roll_die();
    let movable = legal_moves(&next, next.current_seat, value);

    if movable.is_empty() {
        next.dice = None;
        next.current_seat = next_seat(next.current_seat);
    } else {
        next.dice = Some(value);
    }

    Ok(RollOutcome { state: next, value, movable })
}

/// Pass the turn to the next seat, discarding any pending dice.
pub fn skip_turn(state: &LudoState) -> LudoState {
    let mut next = state.clone();
    next.dice = None;
    next.current_seat = next_seat(state.current_seat);
    next
}

// =============================================================================
// RULES ENGINE
// =============================================================================

/// Ludo plugged into the sync core.
#[derive(Clone, Copy, Debug, Default)]
pub struct LudoRules;

impl LudoRules {
    fn require_turn(state: &LudoState, actor: Actor) -> Result<SeatIndex, RuleViolation> {
        let seat = actor.seat().ok_or(RuleViolation::NotSeated)?;
        if seat != state.current_seat {
            return Err(RuleViolation::NotYourTurn { current: state.current_seat });
        }
        Ok(seat)
    }

    fn require_absent(state: &LudoState, roster: &[Seat]) -> Result<(), RuleViolation> {
        let current = state.current_seat;
        match roster.get(current as usize) {
            Some(seat) if seat.is_present() => Err(RuleViolation::SeatPresent(current)),
            _ => Ok(()),
        }
    }

    fn skipped(state: &LudoState, reason: SkipReason) -> Transition<LudoState> {
        let seat = state.current_seat;
        let next = skip_turn(state);
        let delta = LudoDelta::TurnSkipped { seat, reason, next_seat: next.current_seat };
        Transition {
            event_type: delta.event_type(),
            delta: delta.to_value(),
            summary: format!("seat {} skipped ({:?})", seat, reason),
            state: next,
            winner: None,
        }
    }
}

impl RulesEngine for LudoRules {
    type State = LudoState;
    type Action = LudoAction;

    fn game_type(&self) -> GameType {
        GameType::Ludo
    }

    fn seat_count(&self) -> usize {
        SEAT_COUNT as usize
    }

    fn seat_color(&self, seat: SeatIndex) -> SeatColor {
        board::seat_color(seat)
    }

    fn initial_state(&self, seed: u64) -> LudoState {
        LudoState::new(seed)
    }

    fn current_seat(&self, state: &LudoState) -> Option<SeatIndex> {
        match state.winner {
            Some(_) => None,
            None => Some(state.current_seat),
        }
    }

    fn apply(
        &self,
        state: &LudoState,
        roster: &[Seat],
        actor: Actor,
        action: &LudoAction,
    ) -> Result<Transition<LudoState>, RuleViolation> {
        if state.winner.is_some() {
            return Err(RuleViolation::GameOver);
        }

        match *action {
            LudoAction::Roll => {
                let seat = Self::require_turn(state, actor)?;
                let roll = roll_dice(state)?;
                let delta = LudoDelta::DiceRolled {
                    seat,
                    value: roll.value,
                    pending: roll.state.dice,
                    next_seat: roll.state.current_seat,
                    rng: roll.state.rng.clone(),
                };
                let summary = if roll.movable.is_empty() {
                    format!("seat {} rolled {}, no legal move", seat, roll.value)
                } else {
                    format!("seat {} rolled {}", seat, roll.value)
                };
                Ok(Transition {
                    event_type: delta.event_type(),
                    delta: delta.to_value(),
                    summary,
                    state: roll.state,
                    winner: None,
                })
            }

            LudoAction::MoveToken { token_id } => {
                let seat = Self::require_turn(state, actor)?;
                let dice = state.dice.ok_or(RuleViolation::DiceNotRolled)?;
                let moved = apply_move(state, token_id, dice)?;
                let delta = LudoDelta::TokenMoved {
                    seat,
                    token_id,
                    from: moved.from,
                    to: moved.to,
                    captures: moved.captured.len() as u8,
                    next_seat: moved.state.current_seat,
                    winner: moved.winner,
                };
                let mut summary = format!("seat {} moved token {} to {}", seat, token_id, moved.to);
                if !moved.captured.is_empty() {
                    summary.push_str(&format!(", captured {:?}", moved.captured));
                }
                if moved.winner.is_some() {
                    summary.push_str(", wins");
                }
                Ok(Transition {
                    event_type: delta.event_type(),
                    delta: delta.to_value(),
                    summary,
                    state: moved.state,
                    winner: moved.winner,
                })
            }

            LudoAction::SkipTurn { reason } => {
                match reason {
                    SkipReason::Forfeit => {
                        Self::require_turn(state, actor)?;
                    }
                    SkipReason::Timeout => {
                        if actor != Actor::System {
                            return Err(RuleViolation::NotPermitted);
                        }
                    }
                    SkipReason::SeatAbsent => Self::require_absent(state, roster)?,
                }
                Ok(Self::skipped(state, reason))
            }

            LudoAction::AdvanceIfSeatAbsent => {
                Self::require_absent(state, roster)?;
                Ok(Self::skipped(state, SkipReason::SeatAbsent))
            }
        }
    }

    fn validate(&self, state: &LudoState) -> Result<(), CorruptState> {
        state.validate()
    }

    fn apply_delta(
        &self,
        state: &mut LudoState,
        event_type: &EventType,
        delta: &serde_json::Value,
    ) -> DeltaOutcome {
        events::apply_delta(state, event_type, delta)
    }

    fn state_hash(&self, state: &LudoState) -> StateHash {
        state.compute_hash()
    }

    fn ai_action(&self, state: &LudoState, seat: SeatIndex) -> Option<LudoAction> {
        if self.current_seat(state) != Some(seat) {
            return None;
        }
        match state.dice {
            None => Some(LudoAction::Roll),
            Some(dice) => choose_move(state, seat, dice).map(|token_id| LudoAction::MoveToken { token_id }),
        }
    }

    fn absent_seat_action(&self) -> Option<LudoAction> {
        Some(LudoAction::AdvanceIfSeatAbsent)
    }
}

// =============================================================================
// TESTS
// =============================================================================
