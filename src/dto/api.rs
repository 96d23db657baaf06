use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::dto::{
    round::{ActivityId, RemoteId, RoundId},
    validation::validate_danmaku_content,
};

/// Response code the backend uses for success.
pub const CODE_OK: i64 = 0;
/// Response code the backend uses for an expired or invalid token.
pub const CODE_UNAUTHORIZED: i64 = 401;

/// Envelope wrapping every HTTP response body.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

/// Body of a score submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSubmission {
    pub round_id: RoundId,
    pub score: u32,
}

/// One line of the round leaderboard, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    #[serde(alias = "nickname")]
    pub participant: String,
    pub score: u32,
}

/// Prize details returned to a winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinInfo {
    pub prize_name: String,
    #[serde(default)]
    pub prize_level: Option<String>,
    /// Code shown at the prize desk.
    #[serde(default)]
    pub claim_code: Option<String>,
}

/// Final outcome of a round as seen by the current attendee.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    #[serde(default)]
    pub ranking: Vec<RankingEntry>,
    #[serde(default)]
    pub my_rank: Option<u32>,
    #[serde(default)]
    pub my_score: Option<u32>,
    #[serde(default)]
    pub is_winner: bool,
    #[serde(default)]
    pub win_info: Option<WinInfo>,
}

/// Activity (the live event) as configured by the organisers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "ID", alias = "id")]
    pub id: ActivityId,
    #[serde(default)]
    pub title: String,
    /// 0 not started, 1 ongoing, 2 over.
    #[serde(default)]
    pub status: u8,
    #[serde(default)]
    pub check_in_enabled: u8,
    #[serde(default)]
    pub danmaku_enabled: u8,
    /// Whether posted messages go through moderation before display.
    #[serde(default)]
    pub danmaku_audit: u8,
}

impl Activity {
    pub fn is_ongoing(&self) -> bool {
        self.status == 1
    }

    pub fn check_in_enabled(&self) -> bool {
        self.check_in_enabled == 1
    }

    pub fn danmaku_enabled(&self) -> bool {
        self.danmaku_enabled == 1
    }

    pub fn danmaku_moderated(&self) -> bool {
        self.danmaku_audit == 1
    }
}

/// Body of a check-in request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRequest {
    pub activity_id: ActivityId,
}

/// Whether the attendee already checked in, and how the organisers reviewed it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInStatus {
    #[serde(alias = "isCheckedIn", default)]
    pub checked_in: bool,
    #[serde(default)]
    pub check_in_time: Option<String>,
    /// Review state; absent when the backend does not review check-ins.
    #[serde(default)]
    pub status: Option<AuditStatus>,
}

impl CheckInStatus {
    /// Checked in and approved. Without a review state only the check-in counts.
    pub fn can_join(&self) -> bool {
        self.checked_in && self.status.is_none_or(AuditStatus::is_approved)
    }
}

/// Organiser review of an attendee, carried as an integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AuditStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Error)]
#[error("unknown audit status {0}")]
pub struct UnknownAuditStatus(u8);

impl TryFrom<u8> for AuditStatus {
    type Error = UnknownAuditStatus;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Approved),
            2 => Ok(Self::Rejected),
            other => Err(UnknownAuditStatus(other)),
        }
    }
}

impl From<AuditStatus> for u8 {
    fn from(value: AuditStatus) -> Self {
        match value {
            AuditStatus::Pending => 0,
            AuditStatus::Approved => 1,
            AuditStatus::Rejected => 2,
        }
    }
}

impl AuditStatus {
    pub fn is_approved(self) -> bool {
        self == AuditStatus::Approved
    }
}

/// Body of `h5/user/audit`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditInfo {
    pub status: AuditStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A prize the attendee won.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Winning {
    #[serde(rename = "ID", alias = "id", alias = "winnerId")]
    pub id: RemoteId,
    #[serde(default)]
    pub round_id: Option<RoundId>,
    #[serde(default, alias = "roundName")]
    pub round_name: Option<String>,
    pub prize_name: String,
    #[serde(default)]
    pub prize_level: Option<String>,
    #[serde(default)]
    pub claim_code: Option<String>,
    /// 0 unclaimed, 1 claimed.
    #[serde(default)]
    pub claim_status: u8,
}

impl Winning {
    pub fn is_claimed(&self) -> bool {
        self.claim_status == 1
    }
}

/// Message posted to the live wall.
#[derive(Debug, Clone, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DanmakuRequest {
    pub activity_id: ActivityId,
    #[validate(custom(function = "validate_danmaku_content"))]
    pub content: String,
}
