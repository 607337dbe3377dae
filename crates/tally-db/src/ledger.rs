//! Vote ledger and score accumulator.
//!
//! A post's `score` is kept equal to the sum of its rows in `votes`. Both are
//! changed together inside one `BEGIN IMMEDIATE` transaction, which takes the
//! database write lock before the existing vote is read, so two voters on the
//! same post can never both read a stale score.

use std::thread;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tally_types::TallyError;
use tally_types::models::{VoteStatus, VoteValue};
use tracing::{debug, warn};

use crate::models::PostRow;
use crate::queries::query_post;
use crate::{Database, NOW_SQL, storage_error};

pub const MAX_VOTE_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Outcome of re-submitting a vote given the voter's current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTransition {
    /// No previous vote: insert.
    Cast(VoteValue),
    /// Same sign again: remove the row.
    Cancel(VoteValue),
    /// Opposite sign: flip the row in place.
    Switch(VoteValue),
}

impl VoteTransition {
    pub fn resolve(existing: Option<VoteValue>, incoming: VoteValue) -> Self {
        match existing {
            None => Self::Cast(incoming),
            Some(current) if current == incoming => Self::Cancel(incoming),
            Some(_) => Self::Switch(incoming),
        }
    }

    pub fn score_delta(self) -> i64 {
        match self {
            Self::Cast(v) => v.as_i64(),
            Self::Cancel(v) => -v.as_i64(),
            Self::Switch(v) => 2 * v.as_i64(),
        }
    }

    /// The voter's state once the transition is applied.
    pub fn resulting_status(self) -> VoteStatus {
        match self {
            Self::Cast(v) | Self::Switch(v) => Some(v).into(),
            Self::Cancel(_) => VoteStatus::None,
        }
    }
}

impl Database {
    /// Toggle `voter_id`'s vote on `post_id` and return the refreshed post
    /// together with the voter's resulting state.
    ///
    /// Only the sign of `raw_value` is used. Lock contention retries the whole
    /// transaction up to [`MAX_VOTE_ATTEMPTS`] times before `VoteConflict`.
    pub fn apply_vote(
        &self,
        voter_id: &str,
        post_id: i64,
        raw_value: i64,
    ) -> Result<(PostRow, VoteStatus), TallyError> {
        let value = VoteValue::from_raw(raw_value)?;

        let mut attempt = 1;
        loop {
            let result = self
                .writer()
                .and_then(|mut conn| apply_vote_tx(&mut conn, voter_id, post_id, value));

            match result {
                Err(TallyError::VoteConflict) if attempt < MAX_VOTE_ATTEMPTS => {
                    warn!(post_id, attempt, "vote transaction hit lock contention, retrying");
                    thread::sleep(RETRY_BACKOFF * attempt);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Sum of the vote rows for a post, read straight from the ledger.
    pub fn ledger_total(&self, post_id: i64) -> Result<i64, TallyError> {
        let conn = self.reader()?;
        conn.query_row(
            "SELECT COALESCE(SUM(value), 0) FROM votes WHERE post_id = ?1",
            [post_id],
            |row| row.get(0),
        )
        .map_err(storage_error)
    }

    pub fn vote_count(&self, post_id: i64) -> Result<i64, TallyError> {
        let conn = self.reader()?;
        conn.query_row("SELECT COUNT(*) FROM votes WHERE post_id = ?1", [post_id], |row| row.get(0))
            .map_err(storage_error)
    }
}

fn apply_vote_tx(
    conn: &mut Connection,
    voter_id: &str,
    post_id: i64,
    value: VoteValue,
) -> Result<(PostRow, VoteStatus), TallyError> {
    // Dropping `tx` on any early return rolls back.
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(storage_error)?;

    let score: i64 = tx
        .query_row("SELECT score FROM posts WHERE id = ?1", [post_id], |row| row.get(0))
        .optional()
        .map_err(storage_error)?
        .ok_or(TallyError::PostNotFound)?;

    let existing: Option<i64> = tx
        .query_row(
            "SELECT value FROM votes WHERE user_id = ?1 AND post_id = ?2",
            params![voter_id, post_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage_error)?;
    let existing = existing.and_then(VoteValue::from_stored);

    let transition = VoteTransition::resolve(existing, value);
    let written = match transition {
        VoteTransition::Cast(v) => tx.execute(
            "INSERT INTO votes (user_id, post_id, value) VALUES (?1, ?2, ?3)",
            params![voter_id, post_id, v.as_i64()],
        ),
        VoteTransition::Cancel(_) => tx.execute(
            "DELETE FROM votes WHERE user_id = ?1 AND post_id = ?2",
            params![voter_id, post_id],
        ),
        VoteTransition::Switch(v) => tx.execute(
            "UPDATE votes SET value = ?3 WHERE user_id = ?1 AND post_id = ?2",
            params![voter_id, post_id, v.as_i64()],
        ),
    };
    written.map_err(storage_error)?;

    let new_score = score + transition.score_delta();
    tx.execute(
        &format!("UPDATE posts SET score = ?1, updated_at = {} WHERE id = ?2", NOW_SQL),
        params![new_score, post_id],
    )
    .map_err(storage_error)?;

    let post = query_post(&tx, post_id)?.ok_or(TallyError::PostNotFound)?;
    tx.commit().map_err(storage_error)?;

    debug!(post_id, ?transition, score = new_score, "vote applied");
    Ok((post, transition.resulting_status()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{DbOptions, testutil};

    #[test]
    fn transition_table() {
        use VoteValue::{Down, Up};

        assert_eq!(VoteTransition::resolve(None, Up), VoteTransition::Cast(Up));
        assert_eq!(VoteTransition::resolve(Some(Up), Up), VoteTransition::Cancel(Up));
        assert_eq!(VoteTransition::resolve(Some(Up), Down), VoteTransition::Switch(Down));
        assert_eq!(VoteTransition::resolve(Some(Down), Down), VoteTransition::Cancel(Down));

        assert_eq!(VoteTransition::Cast(Up).score_delta(), 1);
        assert_eq!(VoteTransition::Cancel(Up).score_delta(), -1);
        assert_eq!(VoteTransition::Switch(Down).score_delta(), -2);
        assert_eq!(VoteTransition::Switch(Up).score_delta(), 2);
        assert_eq!(VoteTransition::Cancel(Down).resulting_status(), VoteStatus::None);
    }

    #[test]
    fn toggle_scenario_across_two_voters() {
        let db = testutil::open();
        let author = testutil::user(&db, "author");
        let a = testutil::user(&db, "voter_a");
        let b = testutil::user(&db, "voter_b");
        let post = db.insert_post(&author, "p", "body").unwrap();

        let (p, status) = db.apply_vote(&a, post.id, 1).unwrap();
        assert_eq!((p.score, status), (1, VoteStatus::Up));

        let (p, status) = db.apply_vote(&a, post.id, 1).unwrap();
        assert_eq!((p.score, status), (0, VoteStatus::None));
        assert_eq!(db.vote_count(post.id).unwrap(), 0);

        let (p, status) = db.apply_vote(&a, post.id, -1).unwrap();
        assert_eq!((p.score, status), (-1, VoteStatus::Down));

        let (p, status) = db.apply_vote(&b, post.id, 1).unwrap();
        assert_eq!((p.score, status), (0, VoteStatus::Up));
        assert_eq!(db.ledger_total(post.id).unwrap(), 0);
        assert_eq!(db.vote_count(post.id).unwrap(), 2);
    }

    #[test]
    fn switching_sign_moves_score_by_two() {
        let db = testutil::open();
        let author = testutil::user(&db, "author");
        let a = testutil::user(&db, "voter");
        let post = db.insert_post(&author, "p", "body").unwrap();

        assert_eq!(db.apply_vote(&a, post.id, 5).unwrap().0.score, 1);
        assert_eq!(db.apply_vote(&a, post.id, -3).unwrap().0.score, -1);
        assert_eq!(db.apply_vote(&a, post.id, 1).unwrap().0.score, 1);
        assert_eq!(db.vote_count(post.id).unwrap(), 1);
    }

    #[test]
    fn rejected_votes_leave_no_trace() {
        let db = testutil::open();
        let author = testutil::user(&db, "author");
        let a = testutil::user(&db, "voter");
        let post = db.insert_post(&author, "p", "body").unwrap();

        assert_eq!(db.apply_vote(&a, post.id, 0).unwrap_err(), TallyError::InvalidVoteValue);
        assert_eq!(db.apply_vote(&a, post.id + 100, 1).unwrap_err(), TallyError::PostNotFound);

        let stored = db.get_post(post.id).unwrap().unwrap();
        assert_eq!(stored.score, 0);
        assert_eq!(db.vote_count(post.id).unwrap(), 0);
    }

    #[test]
    fn deleting_post_cascades_votes() {
        let db = testutil::open();
        let author = testutil::user(&db, "author");
        let a = testutil::user(&db, "voter");
        let post = db.insert_post(&author, "p", "body").unwrap();
        db.apply_vote(&a, post.id, 1).unwrap();

        assert!(db.delete_post(post.id, &author).unwrap());
        assert_eq!(db.vote_count(post.id).unwrap(), 0);
    }

    #[test]
    fn held_write_lock_exhausts_retries_without_partial_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.db");
        let options = DbOptions {
            busy_timeout: Duration::from_millis(20),
            ..DbOptions::default()
        };
        let db = Database::open_with(&path, &options).unwrap();
        let author = testutil::user(&db, "author");
        let voter = testutil::user(&db, "voter");
        let post = db.insert_post(&author, "p", "body").unwrap();

        // Another process holding the write lock.
        let other = Connection::open(&path).unwrap();
        other.execute_batch("BEGIN IMMEDIATE").unwrap();

        let result = db.apply_vote(&voter, post.id, 1);
        assert_eq!(result.unwrap_err(), TallyError::VoteConflict);

        other.execute_batch("ROLLBACK").unwrap();
        assert_eq!(db.vote_count(post.id).unwrap(), 0);
        assert_eq!(db.get_post(post.id).unwrap().unwrap().score, 0);

        // Once the lock is released the same vote goes through.
        assert_eq!(db.apply_vote(&voter, post.id, 1).unwrap().0.score, 1);
    }

    #[test]
    fn concurrent_voters_keep_score_consistent() {
        let db = Arc::new(testutil::open());
        let author = testutil::user(&db, "author");
        let post = db.insert_post(&author, "p", "body").unwrap();

        let voters: Vec<String> = (0..16)
            .map(|i| testutil::user(&db, &format!("voter{}", i)))
            .collect();

        let handles: Vec<_> = voters
            .into_iter()
            .enumerate()
            .map(|(i, voter)| {
                let db = db.clone();
                let post_id = post.id;
                thread::spawn(move || {
                    // Each voter toggles a few times; odd voters end on a downvote.
                    let value = if i % 2 == 0 { 1 } else { -1 };
                    for _ in 0..3 {
                        db.apply_vote(&voter, post_id, value).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stored = db.get_post(post.id).unwrap().unwrap();
        assert_eq!(stored.score, db.ledger_total(post.id).unwrap());
        assert_eq!(stored.score, 0);
        assert_eq!(db.vote_count(post.id).unwrap(), 16);
    }
}
