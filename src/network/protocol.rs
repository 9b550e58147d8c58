//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket. Messages are
//! JSON text frames, internally tagged by `type`. Requests that expect an
//! answer carry a client-chosen `request_id`, echoed in the reply.

use serde::{Deserialize, Serialize};

use crate::core::ids::{MatchId, UserId};
use crate::services::Profile;
use crate::sync::event::Event;
use crate::sync::processor::ActionError;
use crate::sync::record::{GameType, SeatAssignment, Snapshot};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate the connection.
    Auth {
        /// JWT, or a bare user UUID in development mode
        token: String,
        /// Client version for compatibility check
        client_version: String,
    },

    /// Create a match hosted by the caller.
    CreateMatch {
        /// Echoed in the reply
        request_id: u64,
        /// Game to play
        game_type: GameType,
        /// Seat assignments, in seat order
        seats: Vec<SeatAssignment>,
    },

    /// Start receiving pushed events for a match.
    Subscribe {
        /// Match
        match_id: MatchId,
    },

    /// Stop receiving pushed events for a match.
    Unsubscribe {
        /// Match
        match_id: MatchId,
    },

    /// Fetch a snapshot.
    SyncRequest {
        /// Echoed in the reply
        request_id: u64,
        /// Match
        match_id: MatchId,
    },

    /// Submit a command against a known version.
    SubmitAction {
        /// Echoed in the reply
        request_id: u64,
        /// Match
        match_id: MatchId,
        /// Version the client believes is current
        client_version: u64,
        /// Command, `{"kind": ..., "args": ...}`
        action: serde_json::Value,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client clock, echoed back
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult {
        /// Accepted?
        success: bool,
        /// Resolved user
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        /// Why not
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Error class on failure
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
        /// Server version string
        server_version: String,
    },

    /// Match created.
    MatchCreated {
        /// Request answered
        request_id: u64,
        /// New match
        match_id: MatchId,
    },

    /// Snapshot answer.
    Snapshot {
        /// Request answered
        request_id: u64,
        /// Authoritative record and log tail
        snapshot: Snapshot,
        /// Display profiles of seated users
        #[serde(default)]
        profiles: Vec<Profile>,
    },

    /// Pushed event.
    Event {
        /// The committed event
        event: Event,
    },

    /// Submission committed.
    ActionAccepted {
        /// Request answered
        request_id: u64,
        /// Version after commit
        new_version: u64,
        /// Result summary
        summary: String,
    },

    /// Submission refused.
    ActionRejected {
        /// Request answered
        request_id: u64,
        /// Error class
        code: ErrorCode,
        /// Detail
        message: String,
        /// Current version, for version conflicts
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_version: Option<u64>,
    },

    /// Pong response.
    Pong {
        /// Client clock from the ping
        timestamp: u64,
        /// Server clock (Unix millis)
        server_time: u64,
    },

    /// Error not tied to a submission.
    Error {
        /// Request answered, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        /// Error class
        code: ErrorCode,
        /// Detail
        message: String,
    },

    /// Server is shutting down.
    Shutdown {
        /// Reason
        reason: String,
    },
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Stale client version; resync and retry.
    VersionConflict,
    /// Rules refused the action.
    IllegalAction,
    /// No such match.
    MatchNotFound,
    /// Request needs an authenticated connection.
    NotAuthenticated,
    /// Malformed request.
    InvalidInput,
    /// Server-side failure.
    InternalError,
    /// Authentication refused.
    AuthFailed,
    /// Token expired.
    TokenExpired,
    /// Token malformed.
    InvalidToken,
    /// Game type not served here.
    UnsupportedGame,
}

impl ErrorCode {
    /// Classify a processor error.
    pub fn from_action_error(err: &ActionError) -> Self {
        match err {
            ActionError::VersionConflict { .. } => ErrorCode::VersionConflict,
            ActionError::IllegalAction(_) => ErrorCode::IllegalAction,
            ActionError::MatchNotFound(_) => ErrorCode::MatchNotFound,
            ActionError::Decode(_) => ErrorCode::InvalidInput,
            ActionError::CorruptState(_) | ActionError::Store(_) => ErrorCode::InternalError,
        }
    }
}

impl ServerMessage {
    /// Reply to a failed submission.
    pub fn rejected(request_id: u64, err: &ActionError) -> Self {
        let current_version = match err {
            ActionError::VersionConflict { actual, .. } => Some(*actual),
            _ => None,
        };
        ServerMessage::ActionRejected {
            request_id,
            code: ErrorCode::from_action_error(err),
            message: err.to_string(),
            current_version,
        }
    }

    /// Error reply.
    pub fn error(request_id: Option<u64>, code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error { request_id, code, message: message.into() }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
