use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Duration applied when the server omits it or sends zero.
pub const DEFAULT_ROUND_DURATION_SECONDS: u32 = 30;

/// Opaque backend identifier.
///
/// The backend sends numeric ids on some paths and strings on others; both
/// forms compare equal when they spell the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteId(String);

/// Identifier of a round, stable for the round's lifetime.
pub type RoundId = RemoteId;
/// Identifier of the live activity (event) an attendee joined.
pub type ActivityId = RemoteId;

impl RemoteId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for RemoteId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for RemoteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for RemoteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.parse::<u64>() {
            Ok(number) => serializer.serialize_u64(number),
            Err(_) => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for RemoteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(u64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(number) => Self(number.to_string()),
            RawId::Text(text) => Self(text),
        })
    }
}

/// Server-side lifecycle of a round, carried as an integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RoundStatus {
    /// Created but not started.
    Waiting,
    /// Running; `end_time_ms` is authoritative.
    Active,
    /// Over.
    Ended,
}

/// Status code outside the known lifecycle.
#[derive(Debug, Error)]
#[error("unknown round status {0}")]
pub struct UnknownRoundStatus(u8);

impl TryFrom<u8> for RoundStatus {
    type Error = UnknownRoundStatus;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Waiting),
            1 => Ok(Self::Active),
            2 => Ok(Self::Ended),
            other => Err(UnknownRoundStatus(other)),
        }
    }
}

impl From<RoundStatus> for u8 {
    fn from(value: RoundStatus) -> Self {
        match value {
            RoundStatus::Waiting => 0,
            RoundStatus::Active => 1,
            RoundStatus::Ended => 2,
        }
    }
}

/// One timed instance of the shake game as described by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    #[serde(rename = "ID", alias = "id")]
    pub id: RoundId,
    #[serde(rename = "roundName", alias = "name", default)]
    pub name: String,
    pub status: RoundStatus,
    #[serde(rename = "duration", alias = "durationSeconds", default)]
    pub duration_seconds: u32,
    /// Absolute end of the round in epoch milliseconds, set once Active.
    #[serde(rename = "endTimeMs", default, skip_serializing_if = "Option::is_none")]
    pub end_time_ms: Option<i64>,
    #[serde(rename = "winnerCount", default)]
    pub winner_count: u32,
    /// Opaque reference to the prize attached to the round.
    #[serde(rename = "prize", default, skip_serializing_if = "Option::is_none")]
    pub prize_ref: Option<Value>,
}

impl Round {
    /// Duration in seconds, substituting the default for a missing or zero value.
    pub fn effective_duration_seconds(&self) -> u32 {
        if self.duration_seconds == 0 {
            DEFAULT_ROUND_DURATION_SECONDS
        } else {
            self.duration_seconds
        }
    }

    /// Number of winners drawn, at least one.
    pub fn effective_winner_count(&self) -> u32 {
        self.winner_count.max(1)
    }

    pub fn is_active(&self) -> bool {
        self.status == RoundStatus::Active
    }
}
