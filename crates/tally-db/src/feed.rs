//! Cursor pagination over posts, newest first.

use rusqlite::params;
use tally_types::TallyError;

use crate::models::{POST_COLUMNS, PostRow};
use crate::{Database, storage_error};

/// Hard ceiling on items per page, whatever the caller asks for.
pub const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    limit: usize,
    cursor: Option<i64>,
}

impl PageRequest {
    /// `cursor` is the id of the last item the caller has seen; it does not
    /// need to exist any more.
    pub fn new(limit: i64, cursor: Option<i64>) -> Result<Self, TallyError> {
        if limit <= 0 {
            return Err(TallyError::InvalidPageSize);
        }
        let limit = usize::try_from(limit).unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE);
        Ok(Self { limit, cursor })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Build a page from a fetch of up to `limit + 1` rows; the extra row
    /// only signals that more items exist.
    pub fn from_overfetch(mut rows: Vec<T>, limit: usize) -> Self {
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        Self { items: rows, has_more }
    }
}

impl Database {
    /// Posts with `id < cursor`, ordered by creation time then id, both
    /// descending, so equal timestamps still have a strict order.
    pub fn feed_page(&self, request: &PageRequest) -> Result<Page<PostRow>, TallyError> {
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {} FROM posts
             WHERE (?1 IS NULL OR id < ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
            POST_COLUMNS
        );
        let fetch = (request.limit + 1) as i64;

        let mut stmt = conn.prepare(&sql).map_err(storage_error)?;
        let rows = stmt
            .query_map(params![request.cursor, fetch], PostRow::from_row)
            .map_err(storage_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_error)?;

        Ok(Page::from_overfetch(rows, request.limit))
    }
}
