//! Client Synchronization
//!
//! Keeps a viewer's copy of a match in step with the server.
//!
//! ## Module Structure
//!
//! - `agent`: Pure sync state machine (snapshot, deltas, gap detection)
//! - `driver`: Async loop that runs an agent and publishes a view
//! - `connection`: WebSocket transport with reconnect

pub mod agent;
pub mod driver;
pub mod connection;

pub use agent::{Directive, Phase, SyncAgent, SyncError};
pub use connection::{Connection, ConnectionConfig, Submission};
pub use driver::{
    FetchError, SnapshotSource, SyncDriver, SyncDriverConfig, SyncView, TransportSignal,
};
