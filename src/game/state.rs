//! Ludo State Definitions
//!
//! Token positions, turn ownership, the pending dice value and the winner.
//! The dice RNG lives inside the state so every transition, rolls included,
//! is a pure function of `(state, action)`.

use serde::{Serialize, Deserialize};

use crate::core::hash::{compute_state_hash, StateHash, StateHasher};
use crate::core::ids::SeatIndex;
use crate::core::rng::DeterministicRng;
use crate::game::board::{
    self, BASE, FINISHED, SEAT_COUNT, TOKENS_PER_SEAT, TOKEN_COUNT,
};
use crate::sync::engine::CorruptState;

// =============================================================================
// TOKEN
// =============================================================================

/// Token identifier (0..16); token `id` belongs to seat `id / 4`.
pub type TokenId = u8;

/// One of the four pieces a seat owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Token id
    pub id: TokenId,
    /// Owning seat
    pub owner: SeatIndex,
    /// Relative position: -1 base, 0..=51 track, 52..=57 home lane, 58 finished
    pub position: i8,
}

impl Token {
    /// Token in base.
    pub fn new(id: TokenId) -> Self {
        Self { id, owner: id / TOKENS_PER_SEAT, position: BASE }
    }

    /// Still waiting in base?
    #[inline]
    pub fn in_base(&self) -> bool {
        self.position == BASE
    }

    /// Reached the end of the home lane?
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.position == FINISHED
    }

    /// Global track cell, if on the shared track.
    #[inline]
    pub fn global_cell(&self) -> Option<u8> {
        board::global_cell(self.owner, self.position)
    }

    /// Pips left until finished (base counts as a full lap).
    pub fn distance_to_finish(&self) -> i8 {
        if self.in_base() {
            FINISHED + 1
        } else {
            FINISHED - self.position
        }
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u8(self.id);
        hasher.update_u8(self.owner);
        hasher.update_i8(self.position);
    }
}

// =============================================================================
// LUDO STATE
// =============================================================================

/// Full Ludo game state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LudoState {
    /// All 16 tokens, indexed by id
    pub tokens: Vec<Token>,
    /// Seat owning the turn
    pub current_seat: SeatIndex,
    /// Rolled value awaiting a move
    pub dice: Option<u8>,
    /// Seat with all four tokens home
    pub winner: Option<SeatIndex>,
    /// Dice generator
    pub rng: DeterministicRng,
}

impl LudoState {
    /// All tokens in base, seat 0 to roll.
    pub fn new(seed: u64) -> Self {
        Self {
            tokens: (0..TOKEN_COUNT as u8).map(Token::new).collect(),
            current_seat: 0,
            dice: None,
            winner: None,
            rng: DeterministicRng::new(seed),
        }
    }

    /// Token by id.
    pub fn token(&self, id: TokenId) -> Option<&Token> {
        self.tokens.get(id as usize)
    }

    /// Tokens owned by a seat, in id order.
    pub fn tokens_of(&self, seat: SeatIndex) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(move |t| t.owner == seat)
    }

    /// Has this seat brought all four tokens home?
    pub fn has_finished(&self, seat: SeatIndex) -> bool {
        self.tokens_of(seat).all(Token::is_finished)
    }

    /// Opposing tokens (relative to `seat`) on a global cell.
    pub fn opponents_on(&self, cell: u8, seat: SeatIndex) -> impl Iterator<Item = &Token> {
        self.tokens
            .iter()
            .filter(move |t| t.owner != seat && t.global_cell() == Some(cell))
    }

    /// Does a single opponent hold this non-safe cell with two or more tokens?
    pub fn is_blockade(&self, cell: u8, seat: SeatIndex) -> bool {
        if board::is_safe(cell) {
            return false;
        }
        let mut counts = [0u8; SEAT_COUNT as usize];
        for token in self.opponents_on(cell, seat) {
            counts[token.owner as usize] += 1;
        }
        counts.iter().any(|&c| c >= 2)
    }

    /// Compute deterministic hash of the full state.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(|hasher| {
            hasher.update_u32(self.tokens.len() as u32);
            for token in &self.tokens {
                token.hash_into(hasher);
            }
            hasher.update_u8(self.current_seat);
            hasher.update_opt_u8(self.dice);
            hasher.update_opt_u8(self.winner);
            let [s0, s1] = self.rng.state();
            hasher.update_u64(s0);
            hasher.update_u64(s1);
        })
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), CorruptState> {
        if self.tokens.len() != TOKEN_COUNT {
            return Err(CorruptState::TokenCount {
                expected: TOKEN_COUNT,
                actual: self.tokens.len(),
            });
        }

        for (index, token) in self.tokens.iter().enumerate() {
            if token.id as usize != index || token.owner != token.id / TOKENS_PER_SEAT {
                return Err(CorruptState::TokenIdentity(index));
            }
            if !(BASE..=FINISHED).contains(&token.position) {
                return Err(CorruptState::PositionOutOfRange {
                    token: token.id,
                    position: token.position,
                });
            }
        }

        if self.current_seat >= SEAT_COUNT {
            return Err(CorruptState::SeatOutOfRange(self.current_seat));
        }

        if let Some(dice) = self.dice {
            if !(1..=6).contains(&dice) {
                return Err(CorruptState::InvalidDice(dice));
            }
        }

        let finished: Vec<SeatIndex> = (0..SEAT_COUNT).filter(|&s| self.has_finished(s)).collect();
        match self.winner {
            Some(w) if finished.contains(&w) => {}
            None if finished.is_empty() => {}
            _ => return Err(CorruptState::WinnerMismatch),
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
