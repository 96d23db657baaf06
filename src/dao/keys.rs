//! Storage keys shared by the components that persist round progress.
//!
//! Every key is stored under the application prefix configured on
//! [`DurableStore`](super::storage::DurableStore).

/// Session-scoped projection of the local game status.
pub const GAME_STATUS: &str = "game_status";
/// Session-scoped absolute end time of the round, in epoch milliseconds.
pub const GAME_END_TIME: &str = "game_endTime";
/// Session-scoped flag set while the end time is a local estimate.
pub const GAME_END_TIME_ESTIMATED: &str = "game_endTimeEstimated";
/// Session-scoped round duration, in seconds.
pub const GAME_TOTAL_TIME: &str = "game_totalTime";
/// Session-scoped snapshot of the round as last reconciled.
pub const GAME_ROUND: &str = "game_round";
/// Session-scoped identifier of the processed round.
pub const GAME_ROUND_ID: &str = "game_roundId";
/// Session-scoped shake count reached so far in the round.
pub const GAME_SHAKE_COUNT: &str = "game_shakeCount";
/// Session-scoped authentication token.
pub const TOKEN: &str = "token";
/// Persistent identifier of the activity the attendee joined.
pub const ACTIVITY_ID: &str = "activityId";

/// All session keys describing one round; purged together.
pub const ROUND_SESSION_KEYS: [&str; 7] = [
    GAME_STATUS,
    GAME_END_TIME,
    GAME_END_TIME_ESTIMATED,
    GAME_TOTAL_TIME,
    GAME_ROUND,
    GAME_ROUND_ID,
    GAME_SHAKE_COUNT,
];
