//! Event log replay
//!
//! Rebuilds a match by re-executing every logged command over the genesis
//! record. Because the rules are deterministic and each event carries its
//! command and actor, the result must equal the stored record bit for bit.

use thiserror::Error;
use tracing::{info, warn};

use crate::core::hash::{short_hex, StateHash};
use crate::core::ids::MatchId;
use crate::sync::engine::RulesEngine;
use crate::sync::event::{check_contiguous, Event};
use crate::sync::processor::{process_command, ActionError, Command};
use crate::sync::record::MatchRecord;
use crate::sync::store::{MatchStore, StoreError};

/// Replay failures.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Log has a hole.
    #[error("sequence gap at {found} (expected {expected})")]
    SequenceGap {
        /// Expected seq
        expected: u64,
        /// Seq found
        found: u64,
    },

    /// Logged command no longer applies.
    #[error("event {seq} failed to replay: {source}")]
    Rejected {
        /// Event seq
        seq: u64,
        /// Why
        source: ActionError,
    },

    /// Logged command does not decode.
    #[error("event {seq} has an undecodable command: {message}")]
    Undecodable {
        /// Event seq
        seq: u64,
        /// Decoder message
        message: String,
    },

    /// Replayed event type differs from the logged one.
    #[error("event {seq} replayed as {replayed}, logged as {logged}")]
    TypeMismatch {
        /// Event seq
        seq: u64,
        /// Logged type
        logged: String,
        /// Replayed type
        replayed: String,
    },

    /// Final state differs from the authoritative record.
    #[error("replayed state {replayed} differs from stored {stored}")]
    Diverged {
        /// Hash of the replayed state
        replayed: String,
        /// Hash of the stored state
        stored: String,
    },

    /// Store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Apply `events` (seq 1..N) to `genesis`.
pub fn replay_events<R: RulesEngine>(
    engine: &R,
    genesis: MatchRecord,
    events: &[Event],
) -> Result<MatchRecord, ReplayError> {
    if let Err(found) = check_contiguous(events, genesis.version + 1) {
        let expected = genesis.version + 1
            + events.iter().take_while(|e| e.seq != found).count() as u64;
        return Err(ReplayError::SequenceGap { expected, found });
    }

    let mut record = genesis;
    for event in events {
        let command: Command<R::Action> = serde_json::from_value(event.payload.command.clone())
            .map_err(|e| ReplayError::Undecodable { seq: event.seq, message: e.to_string() })?;

        let outcome = process_command(engine, &record, event.payload.actor, &command)
            .map_err(|source| ReplayError::Rejected { seq: event.seq, source })?;

        if outcome.event_type != event.event_type {
            return Err(ReplayError::TypeMismatch {
                seq: event.seq,
                logged: event.event_type.to_string(),
                replayed: outcome.event_type.to_string(),
            });
        }
        record = outcome.record;
    }
    Ok(record)
}

fn hash_of<R: RulesEngine>(engine: &R, record: &MatchRecord) -> Result<StateHash, ReplayError> {
    let state = engine
        .decode_state(&record.state)
        .map_err(|e| ReplayError::Rejected { seq: record.version, source: e.into() })?;
    Ok(engine.state_hash(&state))
}

/// Replay a stored match and check it against the authoritative record.
///
/// Returns the verified state hash.
pub async fn verify_match<R: RulesEngine, S: MatchStore>(
    engine: &R,
    store: &S,
    match_id: MatchId,
) -> Result<StateHash, ReplayError> {
    let genesis = store.genesis(match_id).await?;
    let events = store.events_since(match_id, 0).await?;
    let stored = store.load(match_id).await?;

    // Only replay up to the version we loaded
    let events: Vec<Event> = events.into_iter().filter(|e| e.seq <= stored.version).collect();
    let replayed = replay_events(engine, genesis, &events)?;

    let replayed_hash = hash_of(engine, &replayed)?;
    let stored_hash = hash_of(engine, &stored)?;

    if replayed_hash != stored_hash || replayed != stored {
        warn!(match_id = %match_id.short(), "Replay diverged");
        return Err(ReplayError::Diverged {
            replayed: short_hex(&replayed_hash),
            stored: short_hex(&stored_hash),
        });
    }

    info!(
        match_id = %match_id.short(),
        version = stored.version,
        hash = %short_hex(&stored_hash),
        "Replay verified"
    );
    Ok(stored_hash)
}
