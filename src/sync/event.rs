//! Event Log entries
//!
//! One immutable fact per committed transition. Each event carries the
//! command that produced it and the actor who issued it, so the log replayed
//! over the genesis record rebuilds the current state exactly.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::ids::{MatchId, SeatIndex};
use crate::sync::engine::Actor;
use crate::sync::record::{MatchStatus, Seat};

/// Event type names shared by every game.
pub mod types {
    /// Match moved from pending to active.
    pub const MATCH_STARTED: &str = "match_started";
    /// Match was cancelled.
    pub const MATCH_CANCELLED: &str = "match_cancelled";
    /// A user took a seat.
    pub const SEAT_JOINED: &str = "seat_joined";
    /// A user left their seat.
    pub const SEAT_LEFT: &str = "seat_left";
    /// A user was removed from their seat.
    pub const SEAT_KICKED: &str = "seat_kicked";
}

/// Event type tag (`"dice_rolled"`, `"seat_joined"`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    /// Create from a type name.
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for EventType {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Match-level changes declared by an event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchDelta {
    /// New status, if it changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MatchStatus>,
    /// Replacement for one roster slot, if it changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat: Option<Seat>,
}

impl MatchDelta {
    /// Delta changing only the status.
    pub fn status(status: MatchStatus) -> Self {
        Self { status: Some(status), seat: None }
    }

    /// Delta changing only one seat.
    pub fn seat(seat: Seat) -> Self {
        Self { status: None, seat: Some(seat) }
    }

    /// Nothing at match level changed.
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.seat.is_none()
    }
}

/// Event payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Who issued the command
    pub actor: Actor,
    /// The command as submitted (`Command<Action>` encoded)
    pub command: serde_json::Value,
    /// Game-specific delta (null for lifecycle events)
    #[serde(default)]
    pub delta: serde_json::Value,
    /// Match-level delta
    #[serde(default)]
    pub match_delta: MatchDelta,
    /// Human-readable result summary
    pub summary: String,
}

/// One committed state transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Match this event belongs to
    pub match_id: MatchId,
    /// Sequence number, equal to the record version after commit
    pub seq: u64,
    /// Type tag
    pub event_type: EventType,
    /// Payload
    pub payload: EventPayload,
    /// Seat that acted, if any
    pub acting_seat: Option<SeatIndex>,
    /// Commit time
    pub timestamp: DateTime<Utc>,
}

/// Check that `events` is the contiguous run `first..first+len`.
///
/// Returns the first sequence number that breaks the run.
pub fn check_contiguous(events: &[Event], first: u64) -> Result<(), u64> {
    for (offset, event) in events.iter().enumerate() {
        let expected = first + offset as u64;
        if event.seq != expected {
            return Err(event.seq);
        }
    }
    Ok(())
}
