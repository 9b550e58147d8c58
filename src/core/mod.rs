//! Core deterministic primitives.
//!
//! Everything here is pure and platform-independent: identifiers, the seeded
//! dice RNG, and state hashing used to verify replays.

pub mod ids;
pub mod rng;
pub mod hash;

// Re-export core types
pub use ids::{MatchId, SeatIndex, UserId};
pub use rng::DeterministicRng;
pub use hash::{compute_state_hash, StateHash};
