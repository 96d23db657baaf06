//! Per-round attendee flow: join, shake, submit, show results.
//!
//! A [`GameSession`] owns the motion detector, the countdown and the round
//! state machine and drives them from a single loop. Transport handlers only
//! forward events into the session's channel, so no game state is touched
//! outside [`GameSession::step`].

use std::{future, sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, mpsc},
    time::{self, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    dto::{
        api::RoundResult,
        round::{ActivityId, RoundId},
        ws::{self, GameStartPayload, GameStopPayload, RoomPayload},
    },
    error::{ClientError, ClientResult},
    services::{
        api_client::GameApi,
        countdown::{Countdown, CountdownEvent},
        motion::MotionDetector,
        transport::{DuplexTransport, EventKind, SubscriptionId, TransportEvent},
    },
    state::{
        game::{GameStatus, LocalGameState},
        round_machine::{PushEvent, RoundStateMachine, TransitionOutcome},
        signals::RoundSignal,
    },
};

/// Inputs forwarded from transport handlers.
#[derive(Debug)]
enum SessionInput {
    GameStart(GameStartPayload),
    GameStop(GameStopPayload),
    TransportOpened,
    ReconnectFailed { failures: u32 },
}

/// What one call to [`GameSession::step`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Round(TransitionOutcome),
    Shake(u32),
    Tick(u32),
    Finished(FinishReport),
    Polled,
    /// The push channel gave up; the round continues on the countdown and polling.
    PushUnavailable { failures: u32 },
}

/// Summary of a finished round.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishReport {
    pub round_id: Option<RoundId>,
    pub score: u32,
    pub submitted: bool,
    pub result: Option<RoundResult>,
}

enum Wake {
    Input(SessionInput),
    Shake(u32),
    Countdown(CountdownEvent),
    Poll,
}

pub struct GameSession {
    activity_id: ActivityId,
    machine: RoundStateMachine,
    motion: MotionDetector,
    countdown: Countdown,
    api: Arc<dyn GameApi>,
    inputs_tx: mpsc::UnboundedSender<SessionInput>,
    inputs: mpsc::UnboundedReceiver<SessionInput>,
    transport: Option<DuplexTransport>,
    subscriptions: Vec<(EventKind, SubscriptionId)>,
    submitted_round: Option<RoundId>,
    poll: Option<Interval>,
}

impl GameSession {
    pub fn new(
        activity_id: ActivityId,
        machine: RoundStateMachine,
        motion: MotionDetector,
        countdown: Countdown,
        api: Arc<dyn GameApi>,
    ) -> Self {
        let (inputs_tx, inputs) = mpsc::unbounded_channel();
        Self {
            activity_id,
            machine,
            motion,
            countdown,
            api,
            inputs_tx,
            inputs,
            transport: None,
            subscriptions: Vec::new(),
            submitted_round: None,
            poll: None,
        }
    }

    /// Poll the backend on a fixed period in addition to push delivery.
    ///
    /// Both sources reconcile through the same machine, so rounds still start once.
    pub fn with_poll_interval(mut self, period: Duration) -> Self {
        let mut poll = time::interval(period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.poll = Some(poll);
        self
    }

    pub fn state(&self) -> &LocalGameState {
        self.machine.state()
    }

    pub fn shake_count(&self) -> u32 {
        self.motion.current_count()
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.countdown.remaining_seconds()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoundSignal> {
        self.machine.subscribe()
    }

    /// Let the attendee join new rounds, once check-in and review allow it.
    pub fn set_join_allowed(&mut self, allowed: bool) {
        info!(allowed, "join eligibility updated");
        self.machine.set_join_allowed(allowed);
    }

    /// Route push events into this session and join the activity room.
    pub fn attach(&mut self, transport: &DuplexTransport) {
        self.detach_transport();

        let forward = |map: fn(&TransportEvent) -> Option<SessionInput>| {
            forward_input(self.inputs_tx.clone(), map)
        };

        let subscriptions = [
            (
                EventKind::GameStart,
                transport.subscribe(
                    EventKind::GameStart,
                    forward(|event| match event {
                        TransportEvent::GameStart(payload) => {
                            Some(SessionInput::GameStart(payload.clone()))
                        }
                        _ => None,
                    }),
                ),
            ),
            (
                EventKind::GameStop,
                transport.subscribe(
                    EventKind::GameStop,
                    forward(|event| match event {
                        TransportEvent::GameStop(payload) => {
                            Some(SessionInput::GameStop(payload.clone()))
                        }
                        _ => None,
                    }),
                ),
            ),
            (
                EventKind::Open,
                transport.subscribe(
                    EventKind::Open,
                    forward(|_| Some(SessionInput::TransportOpened)),
                ),
            ),
            (
                EventKind::ReconnectFailed,
                transport.subscribe(
                    EventKind::ReconnectFailed,
                    forward(|event| match event {
                        TransportEvent::ReconnectFailed { failures } => {
                            Some(SessionInput::ReconnectFailed {
                                failures: *failures,
                            })
                        }
                        _ => None,
                    }),
                ),
            ),
        ];
        self.subscriptions.extend(subscriptions);
        self.transport = Some(transport.clone());
        self.send_room_message(ws::JOIN_ROOM);
    }

    fn send_room_message(&self, kind: &str) {
        let Some(transport) = &self.transport else {
            return;
        };
        let payload = RoomPayload {
            activity_id: self.activity_id.to_string(),
            round_id: self.machine.state().round_id.clone(),
        };
        match serde_json::to_value(&payload) {
            Ok(payload) => {
                if !transport.send(kind, payload) {
                    debug!(kind, "room message not sent; push channel not connected");
                }
            }
            Err(err) => warn!(kind, error = %err, "failed to encode room message"),
        }
    }

    fn detach_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            for (kind, id) in self.subscriptions.drain(..) {
                transport.unsubscribe(kind, id);
            }
        }
    }

    /// Recover a round persisted before a restart and re-arm motion and countdown.
    pub async fn resume(&mut self) -> bool {
        if !self.machine.restore_from_persistence() {
            return false;
        }

        let state = self.machine.state();
        let (count, end_time_ms) = (state.shake_count, state.end_time_ms);
        self.machine.set_game_view(true);
        self.motion.reset();
        self.motion.set_count(count);
        self.start_motion().await;
        match end_time_ms {
            Some(end_time_ms) => self.countdown.start_from_absolute_end(end_time_ms),
            None => self.countdown.stop(),
        }
        info!(
            shake_count = count,
            remaining = ?end_time_ms.map(|_| self.countdown.remaining_seconds()),
            "round resumed"
        );
        true
    }

    /// Ask the backend for the current round and reconcile it.
    pub async fn poll_current_round(&mut self) -> ClientResult<TransitionOutcome> {
        let candidate = self.api.current_round(self.activity_id.clone()).await?;
        Ok(self.apply_outcome(|machine| machine.reconcile(candidate)).await)
    }

    async fn apply_outcome<F>(&mut self, transition: F) -> TransitionOutcome
    where
        F: FnOnce(&mut RoundStateMachine) -> TransitionOutcome,
    {
        let outcome = transition(&mut self.machine);
        let end_time_ms = self.machine.state().end_time_ms;
        match &outcome {
            TransitionOutcome::Started(round) => {
                info!(round_id = %round.id, "joining round");
                self.submitted_round = None;
                self.machine.set_game_view(true);
                self.motion.stop();
                self.motion.reset();
                self.start_motion().await;
                if let Some(end_time_ms) = end_time_ms {
                    self.countdown.start_from_absolute_end(end_time_ms);
                }
            }
            TransitionOutcome::Backfilled => {
                if let Some(end_time_ms) = end_time_ms {
                    self.countdown.start_from_absolute_end(end_time_ms);
                }
            }
            TransitionOutcome::Ended => {
                let report = self.finish().await;
                debug!(?report, "round closed by the backend");
            }
            _ => {}
        }
        outcome
    }

    async fn start_motion(&mut self) {
        if let Err(err) = self.motion.request_start().await {
            let err = ClientError::from(err);
            warn!(error = %err, "playing without shake detection");
        }
    }

    /// Wait for the next input and handle it.
    pub async fn step(&mut self) -> ClientResult<SessionUpdate> {
        let wake = tokio::select! {
            Some(input) = self.inputs.recv() => Wake::Input(input),
            count = self.motion.next_increment() => Wake::Shake(count),
            event = self.countdown.next_event() => Wake::Countdown(event),
            () = next_poll(&mut self.poll) => Wake::Poll,
        };

        match wake {
            Wake::Input(SessionInput::GameStart(payload)) => {
                let outcome = self
                    .apply_outcome(|machine| machine.apply_push_event(PushEvent::GameStart(payload)))
                    .await;
                Ok(SessionUpdate::Round(outcome))
            }
            Wake::Input(SessionInput::GameStop(payload)) => self.handle_game_stop(payload).await,
            Wake::Input(SessionInput::TransportOpened) => {
                self.send_room_message(ws::JOIN_ROOM);
                self.poll_current_round().await.map(SessionUpdate::Round)
            }
            Wake::Input(SessionInput::ReconnectFailed { failures }) => {
                let err = ClientError::ReconnectExhausted { failures };
                error!(error = %err, "push channel unavailable; relying on countdown and polling");
                self.machine.announce_push_unavailable(failures);
                Ok(SessionUpdate::PushUnavailable { failures })
            }
            Wake::Shake(count) => {
                self.machine.record_shake(count);
                Ok(SessionUpdate::Shake(count))
            }
            Wake::Countdown(CountdownEvent::Tick(seconds)) => Ok(SessionUpdate::Tick(seconds)),
            Wake::Countdown(CountdownEvent::Finished) => {
                Ok(SessionUpdate::Finished(self.finish().await))
            }
            Wake::Poll => {
                self.poll_current_round().await?;
                Ok(SessionUpdate::Polled)
            }
        }
    }

    async fn handle_game_stop(&mut self, payload: GameStopPayload) -> ClientResult<SessionUpdate> {
        let playing_here =
            self.machine.status() == GameStatus::Playing && self.machine.is_game_view_active();
        let same_round = match (&payload.round_id, &self.machine.state().round_id) {
            (Some(stopped), Some(current)) => stopped == current,
            _ => true,
        };

        if playing_here && same_round {
            info!(round_id = ?payload.round_id, "round stopped by the organisers");
            return Ok(SessionUpdate::Finished(self.finish().await));
        }
        let outcome = self
            .apply_outcome(|machine| machine.apply_push_event(PushEvent::GameStop(payload)))
            .await;
        Ok(SessionUpdate::Round(outcome))
    }

    /// Stop collecting shakes, submit the score once and fetch the result.
    async fn finish(&mut self) -> FinishReport {
        self.motion.stop();
        self.countdown.stop();

        let score = self.motion.current_count().max(self.machine.state().shake_count);
        self.machine.record_shake(score);
        let round_id = self.machine.state().round_id.clone();

        let mut submitted = false;
        if let Some(round_id) = &round_id {
            if self.submitted_round.as_ref() != Some(round_id) {
                self.submitted_round = Some(round_id.clone());
                match self.api.submit_score(round_id.clone(), score).await {
                    Ok(()) => {
                        submitted = true;
                        info!(%round_id, score, "score submitted");
                    }
                    Err(err) => {
                        let err = ClientError::from(err);
                        warn!(%round_id, score, error = %err, "score submission failed");
                    }
                }
            }
        }

        self.machine.mark_finished();
        self.machine.set_game_view(false);

        let mut result = None;
        if let Some(round_id) = &round_id {
            match self.api.round_result(round_id.clone()).await {
                Ok(Some(fetched)) => {
                    self.machine.set_result(fetched.clone());
                    result = Some(fetched);
                }
                Ok(None) => debug!(%round_id, "round result not available yet"),
                Err(err) => warn!(%round_id, error = %err, "failed to fetch round result"),
            }
        }

        FinishReport {
            round_id,
            score,
            submitted,
            result,
        }
    }

    /// Forget the finished round so the next one can start.
    pub fn reset_for_next_round(&mut self) {
        self.motion.stop();
        self.motion.reset();
        self.countdown.stop();
        self.machine.reset();
        self.machine.set_game_view(false);
        self.submitted_round = None;
    }

    /// Run until `shutdown` fires, then tear down.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        if self.resume().await {
            info!("continuing persisted round");
        }
        if let Err(err) = self.poll_current_round().await {
            warn!(error = %err, "initial round poll failed");
        }

        loop {
            let update = tokio::select! {
                _ = shutdown.cancelled() => break,
                update = self.step() => update,
            };

            match update {
                Ok(SessionUpdate::Round(TransitionOutcome::Started(round))) => {
                    info!(round_id = %round.id, name = %round.name, "round started");
                }
                Ok(SessionUpdate::Finished(report)) => {
                    info!(
                        round_id = ?report.round_id,
                        score = report.score,
                        my_rank = ?report.result.as_ref().and_then(|result| result.my_rank),
                        "round finished"
                    );
                }
                Ok(update) => debug!(?update, "session update"),
                Err(err) => warn!(error = %err, "session step failed"),
            }
        }

        self.teardown();
    }

    /// Stop motion and countdown and drop transport subscriptions. The transport stays connected.
    pub fn teardown(&mut self) {
        self.motion.stop();
        self.countdown.stop();
        self.machine.set_game_view(false);
        self.send_room_message(ws::LEAVE_ROOM);
        self.detach_transport();
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        self.detach_transport();
    }
}

/// Handler forwarding the events `map` accepts into the session channel.
fn forward_input(
    tx: mpsc::UnboundedSender<SessionInput>,
    map: fn(&TransportEvent) -> Option<SessionInput>,
) -> impl Fn(&TransportEvent) + Send + Sync + 'static {
    move |event: &TransportEvent| {
        if let Some(input) = map(event) {
            let _ = tx.send(input);
        }
    }
}

async fn next_poll(poll: &mut Option<Interval>) {
    match poll {
        Some(poll) => {
            poll.tick().await;
        }
        None => future::pending().await,
    }
}
