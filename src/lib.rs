//! # Tabletop Match Server
//!
//! Server-authoritative turn-based match synchronization, with a Ludo rules
//! engine and AI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TABLETOP SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── ids.rs      - Match and user identifiers                │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  └── hash.rs     - State hashing for verification            │
//! │                                                              │
//! │  game/           - Ludo (pure, deterministic)                │
//! │  ├── board.rs    - Track geometry and safe cells             │
//! │  ├── state.rs    - Tokens, turn, dice                        │
//! │  ├── rules.rs    - Legal moves and transitions               │
//! │  ├── events.rs   - Event deltas and client patching          │
//! │  └── ai.rs       - Move heuristic                            │
//! │                                                              │
//! │  sync/           - Authoritative match state                 │
//! │  ├── processor.rs- Single write path, optimistic concurrency │
//! │  ├── store.rs    - Transactional match store                 │
//! │  ├── hub.rs      - Event push                                │
//! │  ├── replay.rs   - Log replay and verification               │
//! │  └── turns.rs    - AI and absent-seat turns                  │
//! │                                                              │
//! │  client/         - Viewer-side synchronization               │
//! │  network/        - WebSocket server (non-deterministic)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency Guarantee
//!
//! Every state change is a command run through `ActionProcessor::submit`
//! against the version the caller saw. The version check, the rules, the
//! state write and the event append commit together or not at all, so a
//! match's event log is gap-free and replaying it from the genesis record
//! reproduces the stored state bit for bit.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod sync;
pub mod client;
pub mod network;
pub mod services;
pub mod config;

// Re-export commonly used types
pub use core::ids::{MatchId, SeatIndex, UserId};
pub use core::rng::DeterministicRng;
pub use game::{LudoAction, LudoRules, LudoState};
pub use sync::{
    ActionError, ActionProcessor, Actor, Command, Event, EventHub, MatchRecord, MatchStatus,
    MatchStore, MemoryMatchStore, RulesEngine, Snapshot,
};
pub use client::SyncAgent;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
