//! Client Synchronization Agent
//!
//! Pure state machine, one per viewer and match. It never performs I/O:
//! each input returns a `Directive` telling the driver whether to fetch a
//! snapshot.
//!
//! ```text
//!   Loading ──snapshot──▶ Live ◀──snapshot── Reconnecting
//!                          │                    ▲
//!                          └────disconnect──────┘
//!   any ──close──▶ Closed
//! ```
//!
//! In `Live`, an event with `seq <= lastSeq` is a duplicate and is dropped;
//! `seq == lastSeq + 1` is patched in; anything further ahead is a gap and
//! forces a resnapshot. A reconnect always resnapshots, and events are
//! ignored until that snapshot lands.
//!
//! Every disconnect and reconnect starts a new fetch epoch. A snapshot
//! fetched in an earlier epoch may predate what the viewer missed, so it is
//! refused and fetched again.

use std::sync::Arc;

use thiserror::Error;

use crate::core::ids::{MatchId, UserId};
use crate::sync::engine::{CorruptState, DeltaOutcome, RulesEngine};
use crate::sync::event::Event;
use crate::sync::record::{MatchStatus, Seat, SeatStatus, Snapshot};

/// Agent lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the first snapshot.
    Loading,
    /// Applying pushed events.
    Live,
    /// Transport dropped, or recovered and awaiting a fresh snapshot.
    Reconnecting,
    /// Unmounted.
    Closed,
}

/// What the driver should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Directive {
    /// Nothing.
    None,
    /// Fetch a full snapshot.
    FetchSnapshot,
}

/// Agent errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// Agent was closed.
    #[error("agent closed")]
    Closed,

    /// Snapshot for a different match.
    #[error("snapshot for match {0}")]
    WrongMatch(MatchId),

    /// Snapshot state failed to decode or validate.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(#[from] CorruptState),
}

/// The Client Synchronization Agent.
pub struct SyncAgent<R: RulesEngine> {
    engine: Arc<R>,
    match_id: MatchId,
    viewer: Option<UserId>,
    phase: Phase,
    connected: bool,
    last_seq: u64,
    status: Option<MatchStatus>,
    roster: Vec<Seat>,
    state: Option<R::State>,
    snapshot_wanted: bool,
    epoch: u64,
}

impl<R: RulesEngine> SyncAgent<R> {
    /// Create an agent in `Loading`.
    pub fn new(engine: Arc<R>, match_id: MatchId, viewer: Option<UserId>) -> Self {
        Self {
            engine,
            match_id,
            viewer,
            phase: Phase::Loading,
            connected: true,
            last_seq: 0,
            status: None,
            roster: Vec::new(),
            state: None,
            snapshot_wanted: false,
            epoch: 0,
        }
    }

    /// Kick off the initial load.
    pub fn start(&mut self) -> Directive {
        self.request_snapshot()
    }

    fn request_snapshot(&mut self) -> Directive {
        if self.phase == Phase::Closed {
            return Directive::None;
        }
        self.snapshot_wanted = true;
        Directive::FetchSnapshot
    }

    /// Apply a snapshot fetched in `epoch`.
    pub fn on_fetched(&mut self, epoch: u64, snapshot: Snapshot) -> Result<Directive, SyncError> {
        if self.phase == Phase::Closed {
            return Err(SyncError::Closed);
        }
        if epoch != self.epoch {
            return Ok(self.on_stale_fetch());
        }
        self.on_snapshot(snapshot)
    }

    /// A fetch from an earlier epoch came back; its result is not used.
    pub fn on_stale_fetch(&mut self) -> Directive {
        if self.phase == Phase::Closed || !self.snapshot_wanted {
            Directive::None
        } else {
            Directive::FetchSnapshot
        }
    }

    /// Apply a snapshot fetched in the current epoch.
    pub fn on_snapshot(&mut self, snapshot: Snapshot) -> Result<Directive, SyncError> {
        if self.phase == Phase::Closed {
            return Err(SyncError::Closed);
        }
        let record = snapshot.record;
        if record.id != self.match_id {
            return Err(SyncError::WrongMatch(record.id));
        }

        // Older than what we already hold: keep ours, and if we were waiting
        // on a resnapshot, ask again.
        if self.phase != Phase::Loading && record.version < self.last_seq {
            return Ok(if self.snapshot_wanted {
                Directive::FetchSnapshot
            } else {
                Directive::None
            });
        }

        let state = self.engine.decode_state(&record.state)?;
        self.engine.validate(&state)?;

        self.state = Some(state);
        self.status = Some(record.status);
        self.roster = record.roster;
        self.last_seq = record.version;
        self.snapshot_wanted = false;
        if self.connected {
            self.phase = Phase::Live;
        }
        Ok(Directive::None)
    }

    /// Snapshot fetch failed; the request stays outstanding.
    pub fn on_fetch_failed(&mut self) -> Directive {
        if self.phase == Phase::Closed {
            Directive::None
        } else {
            Directive::FetchSnapshot
        }
    }

    /// Handle a pushed event.
    pub fn on_event(&mut self, event: &Event) -> Directive {
        if self.phase != Phase::Live || event.match_id != self.match_id {
            return Directive::None;
        }

        if event.seq <= self.last_seq {
            return Directive::None;
        }

        if event.seq > self.last_seq + 1 {
            return if self.snapshot_wanted {
                Directive::None
            } else {
                self.request_snapshot()
            };
        }

        self.last_seq = event.seq;

        let delta = &event.payload.match_delta;
        if let Some(status) = delta.status {
            self.status = Some(status);
        }
        if let Some(seat) = &delta.seat {
            if let Some(slot) = self.roster.get_mut(seat.index as usize) {
                *slot = seat.clone();
            }
        }

        let outcome = match (&mut self.state, event.payload.delta.is_null()) {
            (_, true) => DeltaOutcome::Applied,
            (Some(state), false) => {
                self.engine.apply_delta(state, &event.event_type, &event.payload.delta)
            }
            (None, false) => DeltaOutcome::NeedsSnapshot,
        };

        match outcome {
            DeltaOutcome::Applied => Directive::None,
            DeltaOutcome::NeedsSnapshot if self.snapshot_wanted => Directive::None,
            DeltaOutcome::NeedsSnapshot => self.request_snapshot(),
        }
    }

    /// Ask for a fresh snapshot: idle poll, or a submission came back with
    /// a version conflict.
    pub fn poll(&mut self) -> Directive {
        if self.phase != Phase::Live || !self.connected || self.snapshot_wanted {
            return Directive::None;
        }
        self.request_snapshot()
    }

    /// Transport reported a disconnect.
    pub fn on_disconnect(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        self.connected = false;
        self.epoch += 1;
        if self.phase == Phase::Live {
            self.phase = Phase::Reconnecting;
        }
    }

    /// Transport recovered. Always resnapshots.
    pub fn on_reconnect(&mut self) -> Directive {
        if self.phase == Phase::Closed {
            return Directive::None;
        }
        self.connected = true;
        self.epoch += 1;
        if self.phase == Phase::Live {
            self.phase = Phase::Reconnecting;
        }
        self.request_snapshot()
    }

    /// Unmount.
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
        self.connected = false;
        self.snapshot_wanted = false;
    }

    // =========================================================================
    // DERIVED VALUES
    // =========================================================================

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Version to submit the next action against.
    pub fn version(&self) -> u64 {
        self.last_seq
    }

    /// Is the transport up?
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Is a snapshot outstanding?
    pub fn needs_snapshot(&self) -> bool {
        self.snapshot_wanted
    }

    /// Tag for fetches started now.
    pub fn fetch_epoch(&self) -> u64 {
        self.epoch
    }

    /// Does the viewer own the turn?
    pub fn is_my_turn(&self) -> bool {
        let (Some(viewer), Some(state)) = (self.viewer, &self.state) else {
            return false;
        };
        if self.status != Some(MatchStatus::Active) {
            return false;
        }
        self.engine
            .current_seat(state)
            .and_then(|seat| self.roster.get(seat as usize))
            .map(|seat| seat.identity == Some(viewer) && seat.status == SeatStatus::Joined)
            .unwrap_or(false)
    }

    /// Match being viewed.
    pub fn match_id(&self) -> MatchId {
        self.match_id
    }

    /// Cached game state.
    pub fn state(&self) -> Option<&R::State> {
        self.state.as_ref()
    }

    /// Cached match status.
    pub fn status(&self) -> Option<MatchStatus> {
        self.status
    }

    /// Cached roster.
    pub fn roster(&self) -> &[Seat] {
        &self.roster
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{LudoRules, LudoState};
    use crate::sync::engine::Actor;
    use crate::sync::processor::tests::{active_match, processor, user, LudoProcessor};
    use crate::sync::processor::Command;
    use crate::sync::record::MatchRecord;
    use crate::sync::store::MatchStore;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Authoritative history: every record version and every event.
    struct History {
        records: Vec<MatchRecord>,
        events: Vec<Event>,
    }

    impl History {
        fn snapshot_at(&self, version: u64) -> Snapshot {
            Snapshot {
                record: self.records[version as usize].clone(),
                recent_events: Vec::new(),
            }
        }

        fn state_at(&self, version: u64) -> LudoState {
            serde_json::from_value(self.records[version as usize].state.clone()).unwrap()
        }
    }

    /// Play `steps` AI-chosen actions, recording every version.
    async fn history(seed: u64, steps: usize) -> (Arc<LudoProcessor>, History) {
        let (processor, _rx) = processor();
        let record = active_match(&processor, seed).await;
        let genesis = processor.store().genesis(record.id).await.unwrap();
        let mut records = vec![genesis, record.clone()];

        let engine = LudoRules;
        for _ in 0..steps {
            let current = records.last().unwrap().clone();
            if current.status != MatchStatus::Active {
                break;
            }
            let state: LudoState = serde_json::from_value(current.state.clone()).unwrap();
            let seat = engine.current_seat(&state).unwrap();
            let action = engine.ai_action(&state, seat).unwrap();
            processor
                .submit(current.id, current.version, Actor::Seat(seat), Command::Play(action))
                .await
                .unwrap();
            records.push(processor.store().load(current.id).await.unwrap());
        }
        let events = processor.events_since(record.id, 0).await.unwrap();
        (processor, History { records, events })
    }

    fn agent(history: &History, viewer: Option<UserId>) -> SyncAgent<LudoRules> {
        SyncAgent::new(Arc::new(LudoRules), history.records[0].id, viewer)
    }

    #[tokio::test]
    async fn test_loading_to_live() {
        let (_p, history) = history(7, 4).await;
        let mut agent = agent(&history, Some(user(1)));
        assert_eq!(agent.phase(), Phase::Loading);
        assert_eq!(agent.start(), Directive::FetchSnapshot);

        // Events before the snapshot are ignored
        assert_eq!(agent.on_event(&history.events[0]), Directive::None);

        agent.on_snapshot(history.snapshot_at(1)).unwrap();
        assert_eq!(agent.phase(), Phase::Live);
        assert_eq!(agent.version(), 1);
        assert!(agent.is_my_turn());
    }

    #[tokio::test]
    async fn test_duplicates_are_discarded() {
        let (_p, history) = history(7, 4).await;
        let mut agent = agent(&history, None);
        let _ = agent.start();
        agent.on_snapshot(history.snapshot_at(2)).unwrap();

        assert_eq!(agent.on_event(&history.events[0]), Directive::None);
        assert_eq!(agent.on_event(&history.events[1]), Directive::None);
        assert_eq!(agent.version(), 2);
        assert_eq!(agent.state(), Some(&history.state_at(2)));
    }

    #[tokio::test]
    async fn test_dice_delta_applies_in_place() {
        // Seed 7: event 2 is seat 0 rolling 4 with no move
        let (_p, history) = history(7, 4).await;
        let mut agent = agent(&history, Some(user(2)));
        let _ = agent.start();
        agent.on_snapshot(history.snapshot_at(1)).unwrap();
        assert!(!agent.is_my_turn());

        assert_eq!(agent.on_event(&history.events[1]), Directive::None);
        assert_eq!(agent.version(), 2);
        assert_eq!(agent.state(), Some(&history.state_at(2)));
        assert!(agent.is_my_turn());
    }

    #[tokio::test]
    async fn test_gap_forces_resnapshot() {
        let (_p, history) = history(7, 6).await;
        let mut agent = agent(&history, None);
        let _ = agent.start();
        agent.on_snapshot(history.snapshot_at(1)).unwrap();

        assert_eq!(agent.on_event(&history.events[3]), Directive::FetchSnapshot);
        assert_eq!(agent.phase(), Phase::Live);
        assert_eq!(agent.version(), 1);
        // Only one request outstanding
        assert_eq!(agent.on_event(&history.events[4]), Directive::None);

        agent.on_snapshot(history.snapshot_at(5)).unwrap();
        assert_eq!(agent.version(), 5);
        assert!(!agent.needs_snapshot());
    }

    #[tokio::test]
    async fn test_quiet_token_move_applies_in_place() {
        let (_p, history) = history(7, 4).await;
        let moved = history
            .events
            .iter()
            .find(|e| e.event_type == crate::game::events::TOKEN_MOVED)
            .expect("a token moves in the first four actions")
            .clone();
        assert_eq!(moved.payload.delta["captures"], 0);

        let mut agent = agent(&history, None);
        let _ = agent.start();
        agent.on_snapshot(history.snapshot_at(moved.seq - 1)).unwrap();
        assert_eq!(agent.on_event(&moved), Directive::None);
        assert_eq!(agent.version(), moved.seq);
        assert_eq!(agent.state(), Some(&history.state_at(moved.seq)));
    }

    #[tokio::test]
    async fn test_capturing_move_requests_snapshot() {
        let (_p, history) = history(7, 4).await;
        let mut moved = history
            .events
            .iter()
            .find(|e| e.event_type == crate::game::events::TOKEN_MOVED)
            .expect("a token moves in the first four actions")
            .clone();
        moved.payload.delta["captures"] = serde_json::json!(1);

        let mut agent = agent(&history, None);
        let _ = agent.start();
        agent.on_snapshot(history.snapshot_at(moved.seq - 1)).unwrap();
        assert_eq!(agent.on_event(&moved), Directive::FetchSnapshot);
        assert_eq!(agent.version(), moved.seq);
        assert!(agent.needs_snapshot());
    }

    #[tokio::test]
    async fn test_reconnect_always_resnapshots() {
        let (_p, history) = history(7, 4).await;
        let mut agent = agent(&history, None);
        let _ = agent.start();
        agent.on_snapshot(history.snapshot_at(1)).unwrap();

        agent.on_disconnect();
        assert_eq!(agent.phase(), Phase::Reconnecting);
        assert!(!agent.is_connected());

        assert_eq!(agent.on_reconnect(), Directive::FetchSnapshot);
        assert!(agent.is_connected());
        assert_eq!(agent.phase(), Phase::Reconnecting);

        // Buffered pushes are not trusted until the snapshot lands
        assert_eq!(agent.on_event(&history.events[1]), Directive::None);
        assert_eq!(agent.version(), 1);

        agent.on_snapshot(history.snapshot_at(3)).unwrap();
        assert_eq!(agent.phase(), Phase::Live);
        assert_eq!(agent.version(), 3);
    }

    #[tokio::test]
    async fn test_fetch_from_before_disconnect_is_refused() {
        let (_p, history) = history(7, 4).await;
        let mut agent = agent(&history, None);
        let _ = agent.start();
        agent.on_snapshot(history.snapshot_at(1)).unwrap();

        // Poll goes out, then the transport drops and recovers
        assert_eq!(agent.poll(), Directive::FetchSnapshot);
        let polled_in = agent.fetch_epoch();
        agent.on_disconnect();
        assert_eq!(agent.on_reconnect(), Directive::FetchSnapshot);
        assert_ne!(agent.fetch_epoch(), polled_in);

        // The old answer is refused and fetched again
        assert_eq!(
            agent.on_fetched(polled_in, history.snapshot_at(1)).unwrap(),
            Directive::FetchSnapshot
        );
        assert_eq!(agent.phase(), Phase::Reconnecting);
        assert!(agent.needs_snapshot());

        let current = agent.fetch_epoch();
        assert_eq!(agent.on_fetched(current, history.snapshot_at(4)).unwrap(), Directive::None);
        assert_eq!(agent.phase(), Phase::Live);
        assert_eq!(agent.version(), 4);

        // Nothing outstanding: a late stale answer asks for nothing
        assert_eq!(agent.on_fetched(polled_in, history.snapshot_at(1)).unwrap(), Directive::None);
        assert_eq!(agent.version(), 4);
    }

    #[tokio::test]
    async fn test_reconnect_never_rewinds_version() {
        let (_p, history) = history(7, 4).await;
        let mut agent = agent(&history, None);
        let _ = agent.start();
        agent.on_snapshot(history.snapshot_at(3)).unwrap();

        agent.on_disconnect();
        let _ = agent.on_reconnect();
        assert_eq!(agent.on_snapshot(history.snapshot_at(2)).unwrap(), Directive::FetchSnapshot);
        assert_eq!(agent.phase(), Phase::Reconnecting);
        assert_eq!(agent.version(), 3);
    }

    #[tokio::test]
    async fn test_poll_only_when_settled() {
        let (_p, history) = history(7, 2).await;
        let mut agent = agent(&history, None);
        assert_eq!(agent.poll(), Directive::None);

        let _ = agent.start();
        agent.on_snapshot(history.snapshot_at(1)).unwrap();
        assert_eq!(agent.poll(), Directive::FetchSnapshot);
        assert_eq!(agent.poll(), Directive::None);

        agent.on_snapshot(history.snapshot_at(2)).unwrap();
        agent.on_disconnect();
        assert_eq!(agent.poll(), Directive::None);
    }

    #[tokio::test]
    async fn test_stale_snapshot_in_live_is_ignored() {
        let (_p, history) = history(7, 4).await;
        let mut agent = agent(&history, None);
        let _ = agent.start();
        agent.on_snapshot(history.snapshot_at(2)).unwrap();

        assert_eq!(agent.on_snapshot(history.snapshot_at(1)).unwrap(), Directive::None);
        assert_eq!(agent.version(), 2);
    }

    #[tokio::test]
    async fn test_wrong_match_and_closed() {
        let (_p, history) = history(7, 1).await;
        let mut agent = SyncAgent::new(Arc::new(LudoRules), MatchId::from_bytes([0; 16]), None);
        assert!(matches!(
            agent.on_snapshot(history.snapshot_at(1)),
            Err(SyncError::WrongMatch(_))
        ));

        agent.close();
        assert_eq!(agent.phase(), Phase::Closed);
        assert_eq!(agent.on_reconnect(), Directive::None);
        assert_eq!(agent.on_snapshot(history.snapshot_at(1)), Err(SyncError::Closed));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_rejected() {
        let (_p, history) = history(7, 1).await;
        let mut agent = agent(&history, None);
        let mut snapshot = history.snapshot_at(1);
        snapshot.record.state = serde_json::json!({"tokens": []});
        assert!(matches!(agent.on_snapshot(snapshot), Err(SyncError::CorruptSnapshot(_))));
        assert_eq!(agent.phase(), Phase::Loading);
    }

    /// Deliver the authoritative log with drops, duplicates and reordering.
    /// Whenever the agent settles, its state must match the authoritative
    /// state at its version; after a final reconnect it must be current.
    #[tokio::test]
    async fn test_resync_convergence_under_unreliable_delivery() {
        let (_p, history) = history(11, 120).await;
        let latest = history.records.len() as u64 - 1;

        for schedule_seed in 0..25u64 {
            let mut rng = StdRng::seed_from_u64(schedule_seed);
            let mut agent = agent(&history, None);
            let mut fetch = agent.start() == Directive::FetchSnapshot;
            let mut held: Vec<Event> = Vec::new();

            for (i, event) in history.events.iter().enumerate() {
                let authoritative = i as u64 + 1;

                // Serve any outstanding fetch at the then-current version
                if fetch {
                    fetch = agent.on_snapshot(history.snapshot_at(authoritative)).unwrap()
                        == Directive::FetchSnapshot;
                }

                let roll: f64 = rng.gen();
                if roll < 0.15 {
                    // dropped
                } else if roll < 0.30 {
                    held.push(event.clone());
                } else {
                    fetch |= agent.on_event(event) == Directive::FetchSnapshot;
                    if roll > 0.9 {
                        fetch |= agent.on_event(event) == Directive::FetchSnapshot;
                    }
                }

                if rng.gen_bool(0.2) && !held.is_empty() {
                    let late = held.remove(rng.gen_range(0..held.len()));
                    fetch |= agent.on_event(&late) == Directive::FetchSnapshot;
                }

                if rng.gen_bool(0.03) {
                    agent.on_disconnect();
                    fetch |= agent.on_reconnect() == Directive::FetchSnapshot;
                }

                if agent.phase() == Phase::Live && !agent.needs_snapshot() {
                    assert_eq!(
                        agent.state(),
                        Some(&history.state_at(agent.version())),
                        "schedule {} diverged at version {}",
                        schedule_seed,
                        agent.version()
                    );
                }
            }

            // Final disconnect/reconnect cycle
            agent.on_disconnect();
            assert_eq!(agent.on_reconnect(), Directive::FetchSnapshot);
            agent.on_snapshot(history.snapshot_at(latest)).unwrap();

            assert_eq!(agent.phase(), Phase::Live);
            assert_eq!(agent.version(), latest);
            assert_eq!(agent.state(), Some(&history.state_at(latest)));
            assert_eq!(agent.status(), Some(history.records[latest as usize].status));
            assert_eq!(agent.roster(), history.records[latest as usize].roster.as_slice());
        }
    }

    #[tokio::test]
    async fn test_lifecycle_deltas_update_roster_and_status() {
        let (processor, _rx) = processor();
        let record = active_match(&processor, 7).await;
        let mut agent = SyncAgent::new(Arc::new(LudoRules), record.id, Some(user(1)));
        let _ = agent.start();
        agent.on_snapshot(processor.snapshot(record.id).await.unwrap()).unwrap();

        let left = processor
            .submit(record.id, 1, Actor::Seat(1), Command::Leave { seat: 1 })
            .await
            .unwrap();
        assert_eq!(agent.on_event(&left.event), Directive::None);
        assert_eq!(agent.roster()[1].status, SeatStatus::Left);

        let cancelled = processor
            .submit(record.id, 2, Actor::User(user(1)), Command::Cancel)
            .await
            .unwrap();
        assert_eq!(agent.on_event(&cancelled.event), Directive::None);
        assert_eq!(agent.status(), Some(MatchStatus::Cancelled));
        assert!(!agent.is_my_turn());
    }
}
