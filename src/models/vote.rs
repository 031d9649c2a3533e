use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use sqlx::FromRow;

use crate::models::{PostId, UserId};

/// The two values a vote can carry. There is no neutral vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn value(self) -> i16 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
        }
    }
}

impl TryFrom<i16> for VoteDirection {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(VoteDirection::Up),
            -1 => Ok(VoteDirection::Down),
            other => Err(format!("Invalid vote value: {}", other)),
        }
    }
}

impl std::str::FromStr for VoteDirection {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" | "Up" | "UP" | "1" => Ok(VoteDirection::Up),
            "down" | "Down" | "DOWN" | "-1" => Ok(VoteDirection::Down),
            _ => Err(format!("Unknown vote direction: {}", s)),
        }
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteDirection::Up => f.write_str("up"),
            VoteDirection::Down => f.write_str("down"),
        }
    }
}

impl Serialize for VoteDirection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i16(self.value())
    }
}

// Accepts 1 / -1 as well as "up" / "down".
impl<'de> Deserialize<'de> for VoteDirection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(value) => i16::try_from(value)
                .map_err(|_| format!("Invalid vote value: {}", value))
                .and_then(VoteDirection::try_from)
                .map_err(de::Error::custom),
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VoteRow {
    pub user_id: UserId,
    pub post_id: PostId,
    pub value: i16,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vote {
    pub user_id: UserId,
    pub post_id: PostId,
    pub direction: VoteDirection,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<VoteRow> for Vote {
    type Error = String;

    fn try_from(row: VoteRow) -> Result<Self, Self::Error> {
        Ok(Vote {
            user_id: row.user_id,
            post_id: row.post_id,
            direction: VoteDirection::try_from(row.value)?,
            created_at: row.created_at,
        })
    }
}

// Vote request
#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub value: VoteDirection,
}

/// What a cast did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOutcome {
    Inserted,
    Unchanged,
    Flipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CastVote {
    pub outcome: VoteOutcome,
    pub points: i32,
}

// Vote response
#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub success: bool,
    pub outcome: VoteOutcome,
    pub points: i32,
    pub vote_status: VoteDirection,
}
