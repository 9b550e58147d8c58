//! Ludo Rules Module
//!
//! Pure, deterministic Ludo rules. No networking, no persistence.
//!
//! ## Module Structure
//!
//! - `board`: Track geometry, safe cells, position arithmetic
//! - `state`: Tokens and the full game state
//! - `action`: Externally callable action kinds
//! - `rules`: Move generation, move/roll/skip transitions, `LudoRules`
//! - `events`: Declared deltas and client-side patching
//! - `ai`: Heuristic move selection for AI seats

pub mod board;
pub mod state;
pub mod action;
pub mod rules;
pub mod events;
pub mod ai;

// Re-export key types
pub use action::{LudoAction, SkipReason};
pub use rules::{apply_move, legal_moves, roll_dice, LudoRules};
pub use state::{LudoState, Token, TokenId};
