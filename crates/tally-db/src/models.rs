//! Database row types. These map directly to SQLite rows; conversion into the
//! shared `tally-types` models happens here so corrupt rows are logged once.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Row;
use tally_types::models::{Post, User};
use tracing::warn;
use uuid::Uuid;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub score: i64,
    pub author_id: String,
    pub created_at: String,
    pub updated_at: String,
}

pub(crate) const POST_COLUMNS: &str = "id, title, body, score, author_id, created_at, updated_at";
pub(crate) const USER_COLUMNS: &str = "id, username, password, created_at";

impl PostRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            body: row.get(2)?,
            score: row.get(3)?,
            author_id: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    pub fn author_uuid(&self) -> Uuid {
        parse_uuid(&self.author_id, "author_id", self.id)
    }

    pub fn into_post(self) -> Post {
        Post {
            author_id: self.author_uuid(),
            created_at: parse_timestamp(&self.created_at, "created_at", self.id),
            updated_at: parse_timestamp(&self.updated_at, "updated_at", self.id),
            id: self.id,
            title: self.title,
            body: self.body,
            score: self.score,
        }
    }
}

impl UserRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            password: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    pub fn into_user(self) -> User {
        let id = self.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt user id '{}': {}", self.id, e);
            Uuid::nil()
        });
        let created_at = parse_sqlite_time(&self.created_at).unwrap_or_else(|| {
            warn!("Corrupt created_at '{}' on user '{}'", self.created_at, self.id);
            DateTime::default()
        });
        User {
            id,
            username: self.username,
            created_at,
        }
    }
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS[.SSS]" without timezone.
/// Parse as naive UTC, falling back to RFC 3339.
fn parse_sqlite_time(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|ndt| ndt.and_utc())
        .or_else(|_| raw.parse::<DateTime<Utc>>())
        .ok()
}

fn parse_timestamp(raw: &str, column: &str, post_id: i64) -> DateTime<Utc> {
    parse_sqlite_time(raw).unwrap_or_else(|| {
        warn!("Corrupt {} '{}' on post {}", column, raw, post_id);
        DateTime::default()
    })
}

fn parse_uuid(raw: &str, column: &str, post_id: i64) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on post {}: {}", column, raw, post_id, e);
        Uuid::nil()
    })
}
