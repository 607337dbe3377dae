use std::collections::HashMap;

use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tally_types::TallyError;
use tally_types::models::VoteValue;

use crate::models::{POST_COLUMNS, PostRow, USER_COLUMNS, UserRow};
use crate::{Database, NOW_SQL, storage_error};

impl Database {
    // -- Users --

    /// A username clash, including one lost to a concurrent registration,
    /// surfaces as `TallyError::UsernameTaken`.
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref err, _)
                    if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    anyhow::Error::from(TallyError::UsernameTaken)
                }
                e => e.into(),
            })?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Batch-fetch users for a set of ids. Ids with no row are simply absent
    /// from the result.
    pub fn users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRow>, TallyError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.reader()?;
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT {} FROM users WHERE id IN ({})",
            USER_COLUMNS,
            placeholders.join(", ")
        );

        let mut stmt = conn.prepare(&sql).map_err(storage_error)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), UserRow::from_row)
            .map_err(storage_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_error)?;

        Ok(rows)
    }

    // -- Posts --

    pub fn insert_post(&self, author_id: &str, title: &str, body: &str) -> Result<PostRow, TallyError> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO posts (title, body, author_id) VALUES (?1, ?2, ?3)",
            params![title, body, author_id],
        )
        .map_err(storage_error)?;

        let id = conn.last_insert_rowid();
        query_post(&conn, id)?.ok_or(TallyError::PostNotFound)
    }

    pub fn get_post(&self, id: i64) -> Result<Option<PostRow>, TallyError> {
        let conn = self.reader()?;
        query_post(&conn, id)
    }

    /// Update the author's own post. Absent or empty fields are left unchanged.
    /// Returns `None` when the post does not exist or belongs to someone else.
    pub fn update_post(
        &self,
        id: i64,
        author_id: &str,
        title: Option<&str>,
        body: Option<&str>,
    ) -> Result<Option<PostRow>, TallyError> {
        let title = title.filter(|t| !t.is_empty());
        let body = body.filter(|b| !b.is_empty());

        let conn = self.writer()?;
        let sql = format!(
            "UPDATE posts
             SET title = COALESCE(?1, title), body = COALESCE(?2, body), updated_at = {}
             WHERE id = ?3 AND author_id = ?4",
            NOW_SQL
        );
        let changed = conn
            .execute(&sql, params![title, body, id, author_id])
            .map_err(storage_error)?;

        if changed == 0 {
            return Ok(None);
        }
        query_post(&conn, id)
    }

    /// Delete the author's own post; its votes go with it.
    pub fn delete_post(&self, id: i64, author_id: &str) -> Result<bool, TallyError> {
        let conn = self.writer()?;
        let removed = conn
            .execute("DELETE FROM posts WHERE id = ?1 AND author_id = ?2", params![id, author_id])
            .map_err(storage_error)?;
        Ok(removed > 0)
    }

    // -- Votes --

    /// Batch-fetch vote values for a set of (voter, post) pairs in one query.
    /// Pairs with no vote row are absent from the result.
    pub fn vote_values_for(
        &self,
        pairs: &[(String, i64)],
    ) -> Result<HashMap<(String, i64), VoteValue>, TallyError> {
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.reader()?;
        let tuples: Vec<String> = (0..pairs.len())
            .map(|i| format!("(?{}, ?{})", 2 * i + 1, 2 * i + 2))
            .collect();
        let sql = format!(
            "SELECT user_id, post_id, value FROM votes WHERE (user_id, post_id) IN (VALUES {})",
            tuples.join(", ")
        );
        let values = pairs
            .iter()
            .flat_map(|(user_id, post_id)| [Value::Text(user_id.clone()), Value::Integer(*post_id)]);

        let mut stmt = conn.prepare(&sql).map_err(storage_error)?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })
            .map_err(storage_error)?;

        let mut found = HashMap::with_capacity(pairs.len());
        for row in rows {
            let (user_id, post_id, value) = row.map_err(storage_error)?;
            if let Some(value) = VoteValue::from_stored(value) {
                found.insert((user_id, post_id), value);
            }
        }
        Ok(found)
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
    let row = conn.query_row(&sql, [value], UserRow::from_row).optional()?;
    Ok(row)
}

pub(crate) fn query_post(conn: &Connection, id: i64) -> Result<Option<PostRow>, TallyError> {
    let sql = format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS);
    conn.query_row(&sql, [id], PostRow::from_row)
        .optional()
        .map_err(storage_error)
}

#[cfg(test)]
mod tests {
    use tally_types::TallyError;

    use crate::testutil;

    #[test]
    fn create_and_lookup_users() {
        let db = testutil::open();
        let id = testutil::user(&db, "alice");

        let by_name = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(by_name.id, id);
        assert_eq!(db.get_user_by_id(&id).unwrap().unwrap().username, "alice");
        assert!(db.get_user_by_username("nobody").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let db = testutil::open();
        testutil::user(&db, "alice");
        let err = db.create_user("other-id", "alice", "hash").unwrap_err();
        assert_eq!(err.downcast_ref::<TallyError>(), Some(&TallyError::UsernameTaken));
    }

    #[test]
    fn users_by_ids_skips_missing_rows() {
        let db = testutil::open();
        let alice = testutil::user(&db, "alice");
        let bob = testutil::user(&db, "bob");

        let ids = vec![alice.clone(), "missing".to_string(), bob.clone()];
        let mut names: Vec<String> = db
            .users_by_ids(&ids)
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        names.sort();
        assert_eq!(names, vec!["alice", "bob"]);
        assert!(db.users_by_ids(&[]).unwrap().is_empty());
    }

    #[test]
    fn update_post_only_touches_own_posts_and_given_fields() {
        let db = testutil::open();
        let alice = testutil::user(&db, "alice");
        let bob = testutil::user(&db, "bob");
        let post = db.insert_post(&alice, "title", "body").unwrap();
        assert_eq!(post.score, 0);

        assert!(db.update_post(post.id, &bob, Some("hijack"), None).unwrap().is_none());

        let updated = db
            .update_post(post.id, &alice, Some("new title"), Some(""))
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "new title");
        assert_eq!(updated.body, "body");
        assert_eq!(updated.created_at, post.created_at);
    }

    #[test]
    fn delete_post_requires_author() {
        let db = testutil::open();
        let alice = testutil::user(&db, "alice");
        let bob = testutil::user(&db, "bob");
        let post = db.insert_post(&alice, "title", "body").unwrap();

        assert!(!db.delete_post(post.id, &bob).unwrap());
        assert!(db.delete_post(post.id, &alice).unwrap());
        assert!(db.get_post(post.id).unwrap().is_none());
        assert!(!db.delete_post(post.id, &alice).unwrap());
    }
}
