//! Network Layer
//!
//! WebSocket server exposing the action processor to clients.
//! This layer holds no match state; every write goes through `sync/`.

pub mod auth;
pub mod protocol;
pub mod session;
pub mod server;

pub use auth::{subject_user_id, AuthConfig, AuthError, Authenticator};
pub use protocol::{ClientMessage, ErrorCode, ServerMessage};
pub use session::{SessionError, SessionManager};
pub use server::{GameServer, GameServerError, ServerConfig};
