pub mod feed;
pub mod ledger;
pub mod migrations;
pub mod models;
pub mod queries;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use tally_types::TallyError;
use tracing::info;

/// Current UTC time with millisecond precision, in a form that sorts lexically.
pub(crate) const NOW_SQL: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

#[derive(Debug, Clone)]
pub struct DbOptions {
    pub reader_pool_size: usize,
    pub busy_timeout: Duration,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            reader_pool_size: 4,
            busy_timeout: Duration::from_secs(2),
        }
    }
}

/// One writer connection for every mutation, plus a round-robin pool of
/// read-only connections so feed rendering never waits on the vote path.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, &DbOptions::default())
    }

    pub fn open_with(path: &Path, options: &DbOptions) -> Result<Self> {
        let writer = Connection::open(path)?;

        // WAL mode for concurrent reads
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        writer.busy_timeout(options.busy_timeout)?;

        migrations::run(&writer)?;

        let pool_size = options.reader_pool_size.max(1);
        let mut readers = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(options.busy_timeout)?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Database opened at {} (1 writer + {} readers)",
            path.display(),
            pool_size
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.reader()?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.writer()?;
        f(&mut conn)
    }

    pub(crate) fn reader(&self) -> Result<MutexGuard<'_, Connection>, TallyError> {
        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        self.readers[idx]
            .lock()
            .map_err(|e| TallyError::StorageUnavailable(format!("reader lock poisoned: {}", e)))
    }

    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, Connection>, TallyError> {
        self.writer
            .lock()
            .map_err(|e| TallyError::StorageUnavailable(format!("writer lock poisoned: {}", e)))
    }
}

/// Busy/locked database errors are contention; everything else is fatal for
/// the request.
pub(crate) fn storage_error(err: rusqlite::Error) -> TallyError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => TallyError::VoteConflict,
        _ => TallyError::StorageUnavailable(err.to_string()),
    }
}
