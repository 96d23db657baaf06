use tokio::sync::broadcast;

use crate::dto::round::{Round, RoundId};

/// Notifications emitted by the round state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundSignal {
    /// A round id was seen Active for the first time.
    Started(Round),
    /// A persisted round in progress was recovered.
    Restored { round_id: Option<RoundId> },
    /// The local round reached Finished.
    Finished { round_id: Option<RoundId> },
    /// Results for the finished round arrived.
    ResultReady { round_id: Option<RoundId> },
    /// All round data was cleared.
    Reset,
    /// The push channel stopped reconnecting; rounds now rely on polling and the countdown.
    PushUnavailable { failures: u32 },
}

/// Broadcast hub fanning round signals out to observers.
pub struct SignalHub {
    sender: broadcast::Sender<RoundSignal>,
}

impl SignalHub {
    /// Construct a hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a subscriber that will receive subsequent signals.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundSignal> {
        self.sender.subscribe()
    }

    /// Send a signal to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, signal: RoundSignal) {
        let _ = self.sender.send(signal);
    }
}
