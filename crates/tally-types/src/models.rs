use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::TallyError;

/// Characters of body text shown in a feed item before truncation.
pub const SNIPPET_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub score: i64,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored vote. Zero is never stored: "no vote" is the absence of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteValue {
    Up,
    Down,
}

impl VoteValue {
    /// Only the sign of `raw` is kept.
    pub fn from_raw(raw: i64) -> Result<Self, TallyError> {
        match raw.signum() {
            1 => Ok(Self::Up),
            -1 => Ok(Self::Down),
            _ => Err(TallyError::InvalidVoteValue),
        }
    }

    /// Decode a value read back from the `votes` table.
    pub fn from_stored(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Up),
            -1 => Some(Self::Down),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }
}

impl Serialize for VoteValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

/// Per-viewer vote state on a post. Serialized as `1`, `-1` or `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoteStatus {
    Up,
    Down,
    #[default]
    None,
}

impl From<Option<VoteValue>> for VoteStatus {
    fn from(value: Option<VoteValue>) -> Self {
        match value {
            Some(VoteValue::Up) => Self::Up,
            Some(VoteValue::Down) => Self::Down,
            None => Self::None,
        }
    }
}

impl Serialize for VoteStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Up => serializer.serialize_i64(1),
            Self::Down => serializer.serialize_i64(-1),
            Self::None => serializer.serialize_none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextSnippet {
    pub text: String,
    pub has_more: bool,
}

impl TextSnippet {
    pub fn of(body: &str) -> Self {
        let mut chars = body.chars();
        let text: String = chars.by_ref().take(SNIPPET_CHARS).collect();
        Self {
            text,
            has_more: chars.next().is_some(),
        }
    }
}
