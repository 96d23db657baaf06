use serde::{Deserialize, Serialize};

use crate::dto::{
    api::{RankingEntry, RoundResult, WinInfo},
    round::{Round, RoundId},
};

/// Local projection of the round lifecycle plus the attendee's own progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    /// No round known.
    #[default]
    Idle,
    /// A round exists but has not started.
    Waiting,
    /// The attendee is shaking.
    Playing,
    /// The round is over for this attendee; results may be pending.
    Finished,
}

/// Client-owned state of the current round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalGameState {
    pub current_round: Option<Round>,
    pub round_id: Option<RoundId>,
    pub status: GameStatus,
    pub shake_count: u32,
    /// Absolute end of the round in epoch milliseconds.
    pub end_time_ms: Option<i64>,
    /// The end time was derived from the duration, not sent by the backend.
    pub end_time_estimated: bool,
    pub total_seconds: u32,
    pub ranking: Vec<RankingEntry>,
    pub my_rank: Option<u32>,
    pub is_winner: bool,
    pub win_info: Option<WinInfo>,
}

impl LocalGameState {
    /// Enter Playing for `round`, clearing the previous round's progress and results.
    pub(crate) fn start(&mut self, round: Round, end_time_ms: i64) {
        self.total_seconds = round.effective_duration_seconds();
        self.round_id = Some(round.id.clone());
        self.current_round = Some(round);
        self.status = GameStatus::Playing;
        self.shake_count = 0;
        self.end_time_ms = Some(end_time_ms);
        self.end_time_estimated = false;
        self.ranking.clear();
        self.my_rank = None;
        self.is_winner = false;
        self.win_info = None;
    }

    pub(crate) fn apply_result(&mut self, result: RoundResult) {
        self.ranking = result.ranking;
        self.my_rank = result.my_rank;
        self.is_winner = result.is_winner;
        self.win_info = result.win_info;
    }

    /// Milliseconds left before the recorded end time, negative once past.
    pub fn remaining_ms(&self, now_ms: i64) -> Option<i64> {
        self.end_time_ms.map(|end| end - now_ms)
    }

    pub fn is_playing(&self) -> bool {
        self.status == GameStatus::Playing
    }
}
