//! Match records
//!
//! The persisted shapes: one `MatchRecord` per match holding status, version,
//! the opaque game-state payload and the seat roster.

use serde::{Serialize, Deserialize};

use crate::core::ids::{MatchId, SeatIndex, UserId};
use crate::sync::event::Event;

/// Supported game types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    /// Four-seat Ludo, rules shipped in `crate::game`.
    Ludo,
    /// Two-seat chess, rules supplied by an external engine.
    Chess,
}

/// Match lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Formed, waiting for seats to fill.
    Pending,
    /// In play; game actions accepted.
    Active,
    /// A winner was recorded.
    Completed,
    /// Abandoned before completion.
    Cancelled,
}

impl MatchStatus {
    /// Terminal statuses accept no further commands.
    pub fn is_terminal(self) -> bool {
        matches!(self, MatchStatus::Completed | MatchStatus::Cancelled)
    }
}

/// Seat occupancy status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    /// Occupied and playing.
    Joined,
    /// Open or invited, not yet taken.
    Pending,
    /// Player left voluntarily.
    Left,
    /// Player removed by the host.
    Kicked,
}

/// Seat color (fixed per seat index for a game type).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum SeatColor {
    Blue,
    Red,
    Green,
    Yellow,
    White,
    Black,
}

/// One fixed roster slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    /// Position in the roster (0..N-1)
    pub index: SeatIndex,
    /// Human occupant or invitee
    pub identity: Option<UserId>,
    /// Played by the AI Decision Module
    pub is_ai: bool,
    /// Occupancy
    pub status: SeatStatus,
    /// Fixed color
    pub color: SeatColor,
}

impl Seat {
    /// Is this seat currently playing (human joined or AI)?
    pub fn is_present(&self) -> bool {
        self.status == SeatStatus::Joined
    }

    /// Is this a joined human seat?
    pub fn is_human_joined(&self) -> bool {
        !self.is_ai && self.status == SeatStatus::Joined
    }
}

/// How a seat is filled when the match is formed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user", rename_all = "snake_case")]
pub enum SeatAssignment {
    /// Empty, anyone may join.
    Open,
    /// Reserved for a user who has not joined yet.
    Invited(UserId),
    /// Occupied by a user from the start.
    Human(UserId),
    /// Played by the AI.
    Ai,
}

impl SeatAssignment {
    /// Build the roster slot for this assignment.
    pub fn into_seat(self, index: SeatIndex, color: SeatColor) -> Seat {
        let (identity, is_ai, status) = match self {
            SeatAssignment::Open => (None, false, SeatStatus::Pending),
            SeatAssignment::Invited(user) => (Some(user), false, SeatStatus::Pending),
            SeatAssignment::Human(user) => (Some(user), false, SeatStatus::Joined),
            SeatAssignment::Ai => (None, true, SeatStatus::Joined),
        };
        Seat { index, identity, is_ai, status, color }
    }
}

/// The single authoritative row for a match.
///
/// `version` equals the `seq` of the latest committed event (0 at creation).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Match identifier
    pub id: MatchId,
    /// Game type
    pub game_type: GameType,
    /// Lifecycle status
    pub status: MatchStatus,
    /// Monotonic version
    pub version: u64,
    /// Game-state payload, opaque to the sync layer
    pub state: serde_json::Value,
    /// Fixed roster
    pub roster: Vec<Seat>,
    /// User allowed to start, kick and cancel
    pub host: Option<UserId>,
}

impl MatchRecord {
    /// Seat by index.
    pub fn seat(&self, index: SeatIndex) -> Option<&Seat> {
        self.roster.get(index as usize)
    }

    /// Number of seats currently playing.
    pub fn present_seats(&self) -> usize {
        self.roster.iter().filter(|s| s.is_present()).count()
    }
}

/// Authoritative snapshot served by `getSnapshot`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Current record
    pub record: MatchRecord,
    /// Tail of the event log, oldest first
    pub recent_events: Vec<Event>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_assignment() {
        let user = UserId::from_bytes([1; 16]);
        let seat = SeatAssignment::Invited(user).into_seat(2, SeatColor::Green);
        assert_eq!(seat.status, SeatStatus::Pending);
        assert!(!seat.is_present());

        let ai = SeatAssignment::Ai.into_seat(1, SeatColor::Red);
        assert!(ai.is_present());
        assert!(!ai.is_human_joined());
    }

    #[test]
    fn test_enums_serialize_snake_case() {
        assert_eq!(serde_json::to_string(&MatchStatus::Cancelled).unwrap(), "\"cancelled\"");
        assert_eq!(serde_json::to_string(&GameType::Ludo).unwrap(), "\"ludo\"");
        assert_eq!(serde_json::to_string(&SeatColor::Yellow).unwrap(), "\"yellow\"");
    }

    #[test]
    fn test_terminal_status() {
        assert!(MatchStatus::Completed.is_terminal());
        assert!(MatchStatus::Cancelled.is_terminal());
        assert!(!MatchStatus::Active.is_terminal());
    }
}
