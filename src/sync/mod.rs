//! Match-state synchronization core.
//!
//! Generic over the game through `RulesEngine`; knows nothing about Ludo.
//!
//! ## Module Structure
//!
//! - `engine`: Rules engine capability trait and rule errors
//! - `record`: Match, seat and snapshot records
//! - `event`: Event log entries
//! - `store`: Transactional store trait and in-memory backend
//! - `processor`: The single write path (optimistic concurrency)
//! - `hub`: Push delivery of committed events
//! - `replay`: Rebuild and verify a match from its log
//! - `turns`: AI and absent-seat turn driver

pub mod engine;
pub mod record;
pub mod event;
pub mod store;
pub mod processor;
pub mod hub;
pub mod replay;
pub mod turns;

pub use engine::{Actor, CorruptState, DeltaOutcome, RuleViolation, RulesEngine, Transition};
pub use event::{Event, EventPayload, EventType, MatchDelta};
pub use hub::EventHub;
pub use processor::{ActionError, ActionProcessor, Command, Committed, MatchSetup, ProcessorConfig};
pub use record::{
    GameType, MatchRecord, MatchStatus, Seat, SeatAssignment, SeatColor, SeatStatus, Snapshot,
};
pub use store::{MatchStore, MemoryMatchStore, StoreError};
pub use turns::{TurnDriver, TurnDriverConfig};
