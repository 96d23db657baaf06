//! Authoritative local view of the current round.
//!
//! Poll responses and push events both land in [`RoundStateMachine::reconcile`],
//! which deduplicates by round id so interleaved sources converge on one start
//! per round. Round progress is mirrored into the session scope so a restarted
//! client can pick up where it left off.

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    clock::SharedClock,
    dao::{
        keys,
        storage::{DurableStore, Scope},
    },
    dto::{
        api::RoundResult,
        round::{Round, RoundId, RoundStatus},
        ws::{GameStartPayload, GameStopPayload},
    },
    error::ClientError,
    state::{
        game::{GameStatus, LocalGameState},
        signals::{RoundSignal, SignalHub},
    },
};

const SIGNAL_CAPACITY: usize = 16;

/// Result of feeding one candidate round into the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// A new round id became Active; the game started.
    Started(Round),
    /// Same round as before; a missing or estimated end time was replaced.
    Backfilled,
    /// Same round as before; nothing changed.
    Duplicate,
    /// The round ended while the attendee was away from the game view, or
    /// while its end time was still unknown.
    Ended,
    /// A new round is Active but the attendee may not join it.
    NotEligible,
    /// No transition applies.
    Ignored,
}

/// Push events relevant to the round lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    GameStart(GameStartPayload),
    GameStop(GameStopPayload),
}

pub struct RoundStateMachine {
    store: DurableStore,
    clock: SharedClock,
    state: LocalGameState,
    last_processed: Option<RoundId>,
    game_view_active: bool,
    join_allowed: bool,
    signals: SignalHub,
}

impl RoundStateMachine {
    pub fn new(store: DurableStore, clock: SharedClock) -> Self {
        Self {
            store,
            clock,
            state: LocalGameState::default(),
            last_processed: None,
            game_view_active: false,
            join_allowed: true,
            signals: SignalHub::new(SIGNAL_CAPACITY),
        }
    }

    pub fn state(&self) -> &LocalGameState {
        &self.state
    }

    pub fn status(&self) -> GameStatus {
        self.state.status
    }

    pub fn last_processed_round_id(&self) -> Option<&RoundId> {
        self.last_processed.as_ref()
    }

    pub fn is_game_view_active(&self) -> bool {
        self.game_view_active
    }

    /// Whether the attendee is currently looking at the running game.
    pub fn set_game_view(&mut self, active: bool) {
        self.game_view_active = active;
    }

    /// Whether the attendee passed check-in and review. New rounds are skipped while `false`.
    pub fn set_join_allowed(&mut self, allowed: bool) {
        self.join_allowed = allowed;
    }

    pub fn is_join_allowed(&self) -> bool {
        self.join_allowed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoundSignal> {
        self.signals.subscribe()
    }

    pub(crate) fn announce_push_unavailable(&self, failures: u32) {
        self.signals.broadcast(RoundSignal::PushUnavailable { failures });
    }

    /// Merge a freshly observed round (or its absence) into local state.
    pub fn reconcile(&mut self, candidate: Option<Round>) -> TransitionOutcome {
        let Some(round) = candidate else {
            return self.handle_round_end(None);
        };

        match round.status {
            RoundStatus::Ended => self.handle_round_end(Some(&round.id)),
            RoundStatus::Waiting => {
                if self.state.status == GameStatus::Idle {
                    self.state.status = GameStatus::Waiting;
                    self.state.current_round = Some(round);
                }
                TransitionOutcome::Ignored
            }
            RoundStatus::Active => self.handle_active(round),
        }
    }

    /// Route a push event through the same reconciliation as polling.
    pub fn apply_push_event(&mut self, event: PushEvent) -> TransitionOutcome {
        match event {
            PushEvent::GameStart(GameStartPayload { round: Some(round) }) => {
                self.reconcile(Some(round))
            }
            PushEvent::GameStart(GameStartPayload { round: None }) => {
                debug!("game_start push without round; ignoring");
                TransitionOutcome::Ignored
            }
            PushEvent::GameStop(payload) => {
                if let (Some(stopped), Some(current)) = (&payload.round_id, &self.state.round_id) {
                    if stopped != current {
                        debug!(%stopped, %current, "game_stop for another round; ignoring");
                        return TransitionOutcome::Ignored;
                    }
                }
                self.handle_round_end(payload.round_id.as_ref())
            }
        }
    }

    fn handle_active(&mut self, round: Round) -> TransitionOutcome {
        if self.last_processed.as_ref() == Some(&round.id) {
            return self.backfill_end_time(&round);
        }
        if !self.join_allowed {
            debug!(round_id = %round.id, "attendee not approved; round skipped");
            return TransitionOutcome::NotEligible;
        }

        let estimated = round.end_time_ms.is_none();
        let end_time_ms = round.end_time_ms.unwrap_or_else(|| {
            self.clock.now_ms() + i64::from(round.effective_duration_seconds()) * 1_000
        });
        info!(
            round_id = %round.id,
            name = %round.name,
            end_time_ms,
            estimated,
            "round started"
        );

        self.last_processed = Some(round.id.clone());
        self.state.start(round.clone(), end_time_ms);
        self.state.end_time_estimated = estimated;
        self.persist_round();
        self.signals.broadcast(RoundSignal::Started(round.clone()));
        TransitionOutcome::Started(round)
    }

    /// Take the backend's end time for the round already being played when ours
    /// is missing or only estimated.
    fn backfill_end_time(&mut self, round: &Round) -> TransitionOutcome {
        let replaceable = self.state.end_time_ms.is_none() || self.state.end_time_estimated;
        let Some(end_time_ms) = round.end_time_ms else {
            return TransitionOutcome::Duplicate;
        };
        if !replaceable || self.state.status != GameStatus::Playing {
            return TransitionOutcome::Duplicate;
        }

        self.state.end_time_estimated = false;
        self.store
            .set(Scope::Session, keys::GAME_END_TIME_ESTIMATED, &false);
        if self.state.end_time_ms == Some(end_time_ms) {
            return TransitionOutcome::Duplicate;
        }

        self.state.end_time_ms = Some(end_time_ms);
        self.state.total_seconds = round.effective_duration_seconds();
        self.store
            .set(Scope::Session, keys::GAME_END_TIME, &end_time_ms);
        self.store
            .set(Scope::Session, keys::GAME_TOTAL_TIME, &self.state.total_seconds);
        info!(round_id = %round.id, end_time_ms, "backfilled round end time");
        TransitionOutcome::Backfilled
    }

    fn handle_round_end(&mut self, round_id: Option<&RoundId>) -> TransitionOutcome {
        if self.state.status == GameStatus::Waiting {
            debug!(round_id = ?round_id, "pending round withdrawn");
            self.state.status = GameStatus::Idle;
            self.state.current_round = None;
            return TransitionOutcome::Ignored;
        }
        if self.state.status != GameStatus::Playing {
            return TransitionOutcome::Ignored;
        }
        // A round with no known end has no countdown; only the backend can end it.
        if self.game_view_active && self.state.end_time_ms.is_some() {
            return TransitionOutcome::Ignored;
        }

        info!(round_id = ?round_id, "round ended");
        self.enter_finished();
        TransitionOutcome::Ended
    }

    /// Record the shake count reached so far. Lower counts are ignored.
    pub fn record_shake(&mut self, count: u32) {
        if count <= self.state.shake_count {
            return;
        }
        self.state.shake_count = count;
        if self.state.is_playing() {
            self.store.set(Scope::Session, keys::GAME_SHAKE_COUNT, &count);
        }
    }

    /// Move the current round to Finished. Returns `false` when nothing was playing.
    pub fn mark_finished(&mut self) -> bool {
        if self.state.status != GameStatus::Playing {
            return false;
        }
        self.enter_finished();
        true
    }

    fn enter_finished(&mut self) {
        self.state.status = GameStatus::Finished;
        self.store
            .set(Scope::Session, keys::GAME_STATUS, &GameStatus::Finished);
        self.store
            .set(Scope::Session, keys::GAME_SHAKE_COUNT, &self.state.shake_count);
        self.signals.broadcast(RoundSignal::Finished {
            round_id: self.state.round_id.clone(),
        });
    }

    pub fn set_result(&mut self, result: RoundResult) {
        debug!(
            round_id = ?self.state.round_id,
            my_rank = ?result.my_rank,
            is_winner = result.is_winner,
            "round result received"
        );
        self.state.apply_result(result);
        self.signals.broadcast(RoundSignal::ResultReady {
            round_id: self.state.round_id.clone(),
        });
    }

    /// Recover a round from the session scope after a restart.
    ///
    /// Returns `true` only when a round is still being played. A Playing record
    /// whose end time has passed is purged; one that lost its end time is kept
    /// so the next reconcile can backfill it. A Finished record is restored so
    /// its results can still be fetched.
    pub fn restore_from_persistence(&mut self) -> bool {
        let status = self
            .store
            .get::<GameStatus>(Scope::Session, keys::GAME_STATUS);
        match status {
            Some(GameStatus::Playing) => self.restore_playing(),
            Some(GameStatus::Finished) => {
                self.load_snapshot(GameStatus::Finished);
                debug!(round_id = ?self.state.round_id, "restored finished round");
                false
            }
            _ => false,
        }
    }

    fn restore_playing(&mut self) -> bool {
        let end_time_ms = self
            .store
            .get::<i64>(Scope::Session, keys::GAME_END_TIME);
        let now = self.clock.now_ms();

        match end_time_ms {
            Some(end) if end - now > 0 => {
                self.load_snapshot(GameStatus::Playing);
                info!(
                    round_id = ?self.state.round_id,
                    shake_count = self.state.shake_count,
                    remaining_ms = end - now,
                    "restored round in progress"
                );
                self.signals.broadcast(RoundSignal::Restored {
                    round_id: self.state.round_id.clone(),
                });
                true
            }
            None if self.persisted_round_id().is_some() => {
                self.load_snapshot(GameStatus::Playing);
                info!(
                    round_id = ?self.state.round_id,
                    shake_count = self.state.shake_count,
                    "restored round without an end time"
                );
                self.signals.broadcast(RoundSignal::Restored {
                    round_id: self.state.round_id.clone(),
                });
                true
            }
            stale => {
                let err = ClientError::StaleSession {
                    end_time_ms: stale.unwrap_or_default(),
                };
                warn!(error = %err, "discarding persisted round");
                self.purge_round_keys();
                self.state = LocalGameState::default();
                self.last_processed = None;
                false
            }
        }
    }

    fn persisted_round_id(&self) -> Option<RoundId> {
        self.store
            .get::<RoundId>(Scope::Session, keys::GAME_ROUND_ID)
            .or_else(|| {
                self.store
                    .get::<Round>(Scope::Session, keys::GAME_ROUND)
                    .map(|round| round.id)
            })
    }

    fn load_snapshot(&mut self, status: GameStatus) {
        let round = self.store.get::<Round>(Scope::Session, keys::GAME_ROUND);
        let round_id = self.persisted_round_id();
        let total_seconds = self
            .store
            .get::<u32>(Scope::Session, keys::GAME_TOTAL_TIME)
            .or_else(|| round.as_ref().map(Round::effective_duration_seconds))
            .unwrap_or_default();

        self.state = LocalGameState {
            current_round: round,
            round_id: round_id.clone(),
            status,
            shake_count: self
                .store
                .get::<u32>(Scope::Session, keys::GAME_SHAKE_COUNT)
                .unwrap_or_default(),
            end_time_ms: self.store.get::<i64>(Scope::Session, keys::GAME_END_TIME),
            end_time_estimated: self
                .store
                .get::<bool>(Scope::Session, keys::GAME_END_TIME_ESTIMATED)
                .unwrap_or_default(),
            total_seconds,
            ..LocalGameState::default()
        };
        self.last_processed = round_id;
    }

    /// Clear every trace of the current round, in memory and in the session scope.
    pub fn reset(&mut self) {
        self.purge_round_keys();
        self.state = LocalGameState::default();
        self.last_processed = None;
        info!("round state reset");
        self.signals.broadcast(RoundSignal::Reset);
    }

    fn persist_round(&self) {
        let state = &self.state;
        self.store.set(Scope::Session, keys::GAME_STATUS, &state.status);
        if let Some(round) = &state.current_round {
            self.store.set(Scope::Session, keys::GAME_ROUND, round);
        }
        if let Some(round_id) = &state.round_id {
            self.store.set(Scope::Session, keys::GAME_ROUND_ID, round_id);
        }
        if let Some(end_time_ms) = state.end_time_ms {
            self.store.set(Scope::Session, keys::GAME_END_TIME, &end_time_ms);
        }
        self.store.set(
            Scope::Session,
            keys::GAME_END_TIME_ESTIMATED,
            &state.end_time_estimated,
        );
        self.store
            .set(Scope::Session, keys::GAME_TOTAL_TIME, &state.total_seconds);
        self.store
            .set(Scope::Session, keys::GAME_SHAKE_COUNT, &state.shake_count);
    }

    fn purge_round_keys(&self) {
        for key in keys::ROUND_SESSION_KEYS {
            self.store.remove(Scope::Session, key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::clock::testing::ManualClock;

    const NOW: i64 = 1_700_000_000_000;

    fn active_round(id: u64, end_time_ms: Option<i64>) -> Round {
        Round {
            id: RoundId::from(id),
            name: format!("round {id}"),
            status: RoundStatus::Active,
            duration_seconds: 30,
            end_time_ms,
            winner_count: 3,
            prize_ref: None,
        }
    }

    fn machine(store: &DurableStore) -> (RoundStateMachine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW));
        (RoundStateMachine::new(store.clone(), clock.clone()), clock)
    }

    fn started_count(rx: &mut broadcast::Receiver<RoundSignal>) -> usize {
        let mut started = 0;
        loop {
            match rx.try_recv() {
                Ok(RoundSignal::Started(_)) => started += 1,
                Ok(_) => {}
                Err(TryRecvError::Empty) => return started,
                Err(err) => panic!("unexpected receive error: {err}"),
            }
        }
    }

    #[test]
    fn reconciling_the_same_round_starts_once() {
        let store = DurableStore::in_memory("live_");
        let (mut sm, _clock) = machine(&store);
        let mut signals = sm.subscribe();
        let round = active_round(9, Some(NOW + 30_000));

        assert_eq!(
            sm.reconcile(Some(round.clone())),
            TransitionOutcome::Started(round.clone())
        );
        let once = sm.state().clone();

        for _ in 0..4 {
            assert_eq!(sm.reconcile(Some(round.clone())), TransitionOutcome::Duplicate);
        }

        assert_eq!(sm.state(), &once);
        assert_eq!(started_count(&mut signals), 1);
    }

    #[test]
    fn push_and_poll_converge_on_one_start() {
        let store = DurableStore::in_memory("live_");
        let (mut sm, _clock) = machine(&store);
        let mut signals = sm.subscribe();
        let round = active_round(9, Some(NOW + 30_000));

        sm.apply_push_event(PushEvent::GameStart(GameStartPayload {
            round: Some(round.clone()),
        }));
        sm.reconcile(Some(round));

        assert_eq!(started_count(&mut signals), 1);
    }

    #[test]
    fn start_persists_round_record() {
        let store = DurableStore::in_memory("live_");
        let (mut sm, _clock) = machine(&store);
        sm.reconcile(Some(active_round(9, Some(NOW + 30_000))));

        assert_eq!(
            store.get::<GameStatus>(Scope::Session, keys::GAME_STATUS),
            Some(GameStatus::Playing)
        );
        assert_eq!(
            store.get::<i64>(Scope::Session, keys::GAME_END_TIME),
            Some(NOW + 30_000)
        );
        assert_eq!(store.get::<u32>(Scope::Session, keys::GAME_TOTAL_TIME), Some(30));
        assert_eq!(store.get::<u32>(Scope::Session, keys::GAME_SHAKE_COUNT), Some(0));
        assert_eq!(
            store.get::<RoundId>(Scope::Session, keys::GAME_ROUND_ID),
            Some(RoundId::from(9))
        );
    }

    #[test]
    fn estimated_end_time_gives_way_to_the_backend_one() {
        let store = DurableStore::in_memory("live_");
        let (mut sm, _clock) = machine(&store);

        sm.reconcile(Some(active_round(5, None)));
        assert_eq!(sm.state().end_time_ms, Some(NOW + 30_000));
        assert!(sm.state().end_time_estimated);
        assert_eq!(
            store.get::<bool>(Scope::Session, keys::GAME_END_TIME_ESTIMATED),
            Some(true)
        );

        assert_eq!(
            sm.reconcile(Some(active_round(5, Some(NOW + 10_000)))),
            TransitionOutcome::Backfilled
        );
        assert_eq!(sm.state().end_time_ms, Some(NOW + 10_000));
        assert!(!sm.state().end_time_estimated);
        assert_eq!(
            store.get::<i64>(Scope::Session, keys::GAME_END_TIME),
            Some(NOW + 10_000)
        );

        // An end time the backend already sent is not replaced again.
        assert_eq!(
            sm.reconcile(Some(active_round(5, Some(NOW + 25_000)))),
            TransitionOutcome::Duplicate
        );
        assert_eq!(sm.state().end_time_ms, Some(NOW + 10_000));
    }

    #[test]
    fn backend_end_time_is_kept_when_set_at_start() {
        let store = DurableStore::in_memory("live_");
        let (mut sm, _clock) = machine(&store);

        sm.reconcile(Some(active_round(5, Some(NOW + 20_000))));
        assert!(!sm.state().end_time_estimated);
        assert_eq!(
            sm.reconcile(Some(active_round(5, Some(NOW + 25_000)))),
            TransitionOutcome::Duplicate
        );
        assert_eq!(sm.state().end_time_ms, Some(NOW + 20_000));
    }

    #[test]
    fn new_round_id_restarts_the_game() {
        let store = DurableStore::in_memory("live_");
        let (mut sm, _clock) = machine(&store);
        sm.reconcile(Some(active_round(1, Some(NOW + 30_000))));
        sm.record_shake(11);

        let outcome = sm.reconcile(Some(active_round(2, Some(NOW + 60_000))));
        assert!(matches!(outcome, TransitionOutcome::Started(_)));
        assert_eq!(sm.state().shake_count, 0);
        assert_eq!(sm.last_processed_round_id(), Some(&RoundId::from(2)));
    }

    #[test]
    fn ended_round_only_finishes_outside_the_game_view() {
        let store = DurableStore::in_memory("live_");
        let (mut sm, _clock) = machine(&store);
        sm.reconcile(Some(active_round(3, Some(NOW + 30_000))));

        sm.set_game_view(true);
        assert_eq!(sm.reconcile(None), TransitionOutcome::Ignored);
        assert_eq!(sm.status(), GameStatus::Playing);

        sm.set_game_view(false);
        let mut ended = active_round(3, Some(NOW + 30_000));
        ended.status = RoundStatus::Ended;
        assert_eq!(sm.reconcile(Some(ended)), TransitionOutcome::Ended);
        assert_eq!(sm.status(), GameStatus::Finished);
        assert_eq!(
            store.get::<GameStatus>(Scope::Session, keys::GAME_STATUS),
            Some(GameStatus::Finished)
        );
    }

    #[test]
    fn waiting_round_does_not_start() {
        let store = DurableStore::in_memory("live_");
        let (mut sm, _clock) = machine(&store);
        let mut waiting = active_round(4, None);
        waiting.status = RoundStatus::Waiting;

        assert_eq!(sm.reconcile(Some(waiting)), TransitionOutcome::Ignored);
        assert_eq!(sm.status(), GameStatus::Waiting);
        assert!(sm.last_processed_round_id().is_none());
    }

    #[test]
    fn withdrawn_pending_round_returns_to_idle() {
        let store = DurableStore::in_memory("live_");
        let (mut sm, _clock) = machine(&store);
        let mut waiting = active_round(4, None);
        waiting.status = RoundStatus::Waiting;

        sm.reconcile(Some(waiting.clone()));
        assert_eq!(sm.reconcile(None), TransitionOutcome::Ignored);
        assert_eq!(sm.status(), GameStatus::Idle);
        assert!(sm.state().current_round.is_none());

        sm.reconcile(Some(waiting.clone()));
        let mut cancelled = waiting;
        cancelled.status = RoundStatus::Ended;
        sm.reconcile(Some(cancelled));
        assert_eq!(sm.status(), GameStatus::Idle);

        // A pending round that goes live still starts.
        let mut pending = active_round(6, Some(NOW + 30_000));
        pending.status = RoundStatus::Waiting;
        sm.reconcile(Some(pending));
        assert!(matches!(
            sm.reconcile(Some(active_round(6, Some(NOW + 30_000)))),
            TransitionOutcome::Started(_)
        ));
    }

    #[test]
    fn unapproved_attendee_does_not_join() {
        let store = DurableStore::in_memory("live_");
        let (mut sm, _clock) = machine(&store);
        let mut signals = sm.subscribe();
        sm.set_join_allowed(false);

        let round = active_round(9, Some(NOW + 30_000));
        assert_eq!(sm.reconcile(Some(round.clone())), TransitionOutcome::NotEligible);
        assert_eq!(sm.status(), GameStatus::Idle);
        assert!(!store.contains(Scope::Session, keys::GAME_STATUS));
        assert_eq!(started_count(&mut signals), 0);

        // Approval later in the event lets the same round start.
        sm.set_join_allowed(true);
        assert!(matches!(
            sm.reconcile(Some(round)),
            TransitionOutcome::Started(_)
        ));
    }

    #[test]
    fn game_stop_for_another_round_is_ignored() {
        let store = DurableStore::in_memory("live_");
        let (mut sm, _clock) = machine(&store);
        sm.reconcile(Some(active_round(3, Some(NOW + 30_000))));

        let outcome = sm.apply_push_event(PushEvent::GameStop(GameStopPayload {
            round_id: Some(RoundId::from(99)),
        }));
        assert_eq!(outcome, TransitionOutcome::Ignored);
        assert_eq!(sm.status(), GameStatus::Playing);

        let outcome = sm.apply_push_event(PushEvent::GameStop(GameStopPayload::default()));
        assert_eq!(outcome, TransitionOutcome::Ended);
    }

    #[test]
    fn restores_round_in_progress() {
        let store = DurableStore::in_memory("live_");
        store.set(Scope::Session, keys::GAME_STATUS, &GameStatus::Playing);
        store.set(Scope::Session, keys::GAME_END_TIME, &(NOW + 5_000));
        store.set(Scope::Session, keys::GAME_SHAKE_COUNT, &7u32);
        store.set(Scope::Session, keys::GAME_ROUND_ID, &RoundId::from(9));

        let (mut sm, _clock) = machine(&store);
        assert!(sm.restore_from_persistence());
        assert_eq!(sm.status(), GameStatus::Playing);
        assert_eq!(sm.state().shake_count, 7);
        assert_eq!(sm.last_processed_round_id(), Some(&RoundId::from(9)));

        // The restored round is not started a second time.
        assert_eq!(
            sm.reconcile(Some(active_round(9, Some(NOW + 5_000)))),
            TransitionOutcome::Duplicate
        );
    }

    #[test]
    fn restored_round_without_end_time_keeps_its_count_and_backfills() {
        let store = DurableStore::in_memory("live_");
        store.set(Scope::Session, keys::GAME_STATUS, &GameStatus::Playing);
        store.set(Scope::Session, keys::GAME_SHAKE_COUNT, &7u32);
        store.set(Scope::Session, keys::GAME_ROUND_ID, &RoundId::from(9));

        let (mut sm, _clock) = machine(&store);
        let mut signals = sm.subscribe();
        assert!(sm.restore_from_persistence());
        assert_eq!(sm.status(), GameStatus::Playing);
        assert_eq!(sm.state().end_time_ms, None);

        assert_eq!(
            sm.reconcile(Some(active_round(9, Some(NOW + 20_000)))),
            TransitionOutcome::Backfilled
        );
        assert_eq!(sm.state().shake_count, 7);
        assert_eq!(sm.state().end_time_ms, Some(NOW + 20_000));
        assert_eq!(
            store.get::<i64>(Scope::Session, keys::GAME_END_TIME),
            Some(NOW + 20_000)
        );
        assert_eq!(started_count(&mut signals), 0);
    }

    #[test]
    fn round_without_end_time_ends_when_the_backend_says_so() {
        let store = DurableStore::in_memory("live_");
        store.set(Scope::Session, keys::GAME_STATUS, &GameStatus::Playing);
        store.set(Scope::Session, keys::GAME_ROUND_ID, &RoundId::from(9));

        let (mut sm, _clock) = machine(&store);
        assert!(sm.restore_from_persistence());
        sm.set_game_view(true);

        assert_eq!(sm.reconcile(None), TransitionOutcome::Ended);
        assert_eq!(sm.status(), GameStatus::Finished);
    }

    #[test]
    fn record_without_end_time_or_round_is_purged() {
        let store = DurableStore::in_memory("live_");
        store.set(Scope::Session, keys::GAME_STATUS, &GameStatus::Playing);
        store.set(Scope::Session, keys::GAME_SHAKE_COUNT, &7u32);

        let (mut sm, _clock) = machine(&store);
        assert!(!sm.restore_from_persistence());
        assert_eq!(sm.status(), GameStatus::Idle);
        assert!(!store.contains(Scope::Session, keys::GAME_STATUS));
    }

    #[test]
    fn stale_round_is_purged() {
        let store = DurableStore::in_memory("live_");
        store.set(Scope::Session, keys::GAME_STATUS, &GameStatus::Playing);
        store.set(Scope::Session, keys::GAME_END_TIME, &(NOW - 1_000));
        store.set(Scope::Session, keys::GAME_SHAKE_COUNT, &7u32);
        store.set(Scope::Session, keys::GAME_TOTAL_TIME, &30u32);
        store.set(Scope::Session, keys::GAME_ROUND_ID, &RoundId::from(9));
        store.set(Scope::Session, keys::GAME_ROUND, &active_round(9, Some(NOW - 1_000)));
        store.set(Scope::Session, keys::GAME_END_TIME_ESTIMATED, &false);

        let (mut sm, _clock) = machine(&store);
        assert!(!sm.restore_from_persistence());
        assert_eq!(sm.status(), GameStatus::Idle);
        for key in keys::ROUND_SESSION_KEYS {
            assert!(!store.contains(Scope::Session, key), "{key} still stored");
        }
    }

    #[test]
    fn finished_record_restores_without_resuming() {
        let store = DurableStore::in_memory("live_");
        store.set(Scope::Session, keys::GAME_STATUS, &GameStatus::Finished);
        store.set(Scope::Session, keys::GAME_SHAKE_COUNT, &17u32);
        store.set(Scope::Session, keys::GAME_ROUND_ID, &RoundId::from(9));

        let (mut sm, _clock) = machine(&store);
        assert!(!sm.restore_from_persistence());
        assert_eq!(sm.status(), GameStatus::Finished);
        assert_eq!(sm.state().shake_count, 17);
    }

    #[test]
    fn reset_clears_memory_and_session_keys() {
        let store = DurableStore::in_memory("live_");
        let (mut sm, _clock) = machine(&store);
        let round = active_round(9, Some(NOW + 30_000));
        sm.reconcile(Some(round.clone()));
        sm.record_shake(4);

        sm.reset();

        assert_eq!(sm.state(), &LocalGameState::default());
        assert!(!store.contains(Scope::Session, keys::GAME_STATUS));
        // After a reset the same round id is processed again.
        assert!(matches!(
            sm.reconcile(Some(round)),
            TransitionOutcome::Started(_)
        ));
    }

    #[test]
    fn mark_finished_only_from_playing() {
        let store = DurableStore::in_memory("live_");
        let (mut sm, _clock) = machine(&store);
        assert!(!sm.mark_finished());

        sm.reconcile(Some(active_round(9, Some(NOW + 30_000))));
        sm.record_shake(17);
        sm.record_shake(3);
        assert!(sm.mark_finished());
        assert_eq!(sm.state().shake_count, 17);
        assert_eq!(store.get::<u32>(Scope::Session, keys::GAME_SHAKE_COUNT), Some(17));
        assert!(!sm.mark_finished());
    }
}
