//! Ludo Actions
//!
//! The externally callable action kinds. Wire form is
//! `{"kind": "move_token", "args": {"token_id": 5}}`.

use serde::{Serialize, Deserialize};

use crate::game::state::TokenId;

/// Why a turn was skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Current seat gave up its turn.
    Forfeit,
    /// Server timed the seat out.
    Timeout,
    /// Turn owner is not in the match.
    SeatAbsent,
}

/// A Ludo action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "args", rename_all = "snake_case")]
pub enum LudoAction {
    /// Roll the die.
    Roll,
    /// Move a token by the pending dice value.
    MoveToken {
        /// Token to move
        token_id: TokenId,
    },
    /// Give up the current turn.
    SkipTurn {
        /// Why
        reason: SkipReason,
    },
    /// Skip the turn of a seat that is not in the match.
    AdvanceIfSeatAbsent,
}
