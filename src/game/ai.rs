//! AI Decision Module
//!
//! Picks a move for a non-human seat. Legality is always re-derived from
//! `legal_moves`; the chosen action then goes through the same processor
//! path as a human's.

use std::cmp::Reverse;

use crate::core::ids::SeatIndex;
use crate::game::board::{self, compute_next_position, FINISHED, SPAWN_ROLL};
use crate::game::rules::legal_moves;
use crate::game::state::{LudoState, TokenId};

/// Heuristic tiers, best first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Advance = 0,
    Finish = 1,
    Capture = 2,
    Spawn = 3,
}

/// Choose a token to move for `seat` with the given dice value.
///
/// Spawn on a 6, then capture, then finish, then advance the token furthest
/// from home. Ties go to the lowest token id.
pub fn choose_move(state: &LudoState, seat: SeatIndex, dice: u8) -> Option<TokenId> {
    legal_moves(state, seat, dice)
        .into_iter()
        .filter_map(|id| {
            let token = state.token(id)?;
            let to = compute_next_position(token.position, dice)?;
            Some((tier(state, seat, token.position, to, dice), token.distance_to_finish(), Reverse(id)))
        })
        .max()
        .map(|(_, _, Reverse(id))| id)
}

fn tier(state: &LudoState, seat: SeatIndex, from: i8, to: i8, dice: u8) -> Tier {
    if from == board::BASE && dice == SPAWN_ROLL {
        return Tier::Spawn;
    }
    let captures = board::global_cell(seat, to)
        .filter(|cell| !board::is_safe(*cell))
        .map(|cell| state.opponents_on(cell, seat).next().is_some())
        .unwrap_or(false);
    if captures {
        Tier::Capture
    } else if to == FINISHED {
        Tier::Finish
    } else {
        Tier::Advance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_beats_everything_on_six() {
        let mut state = LudoState::new(1);
        state.tokens[0].position = 52; // could finish with 6
        state.tokens[1].position = 10;
        assert_eq!(choose_move(&state, 0, 6), Some(2));
    }

    #[test]
    fn test_capture_beats_finish() {
        let mut state = LudoState::new(1);
        state.tokens[0].position = 55; // finishes with 3
        state.tokens[1].position = 2; // lands on 5
        state.tokens[4].position = 44; // seat 1: (44 + 13) % 52 = 5
        assert_eq!(choose_move(&state, 0, 3), Some(1));
    }

    #[test]
    fn test_finish_beats_advance() {
        let mut state = LudoState::new(1);
        state.tokens[0].position = 10;
        state.tokens[1].position = 54;
        assert_eq!(choose_move(&state, 0, 4), Some(1));
    }

    #[test]
    fn test_advances_furthest_from_home() {
        let mut state = LudoState::new(1);
        state.tokens[0].position = 30;
        state.tokens[1].position = 3;
        state.tokens[2].position = 20;
        assert_eq!(choose_move(&state, 0, 2), Some(1));
    }

    #[test]
    fn test_ties_go_to_lowest_id() {
        let mut state = LudoState::new(1);
        state.tokens[2].position = 4;
        state.tokens[3].position = 4;
        assert_eq!(choose_move(&state, 0, 1), Some(2));
    }

    #[test]
    fn test_no_legal_move() {
        let state = LudoState::new(1);
        assert_eq!(choose_move(&state, 0, 3), None);
    }
}
