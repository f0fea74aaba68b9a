//! Projection sessions
//!
//! A session pins one state connection plus the exclusion primitive for the
//! whole acquire…release section. Never share a session between concurrent
//! holders: the primitive is scoped to it.

use rusqlite::{Connection, ErrorCode};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tessera_core::error::{Result, TesseraError};
use tessera_core::traits::SessionLock;

/// Exclusion primitive backed by exclusive transactions on lock files
///
/// Each key maps to `<dir>/<key>.lock`. Taking the lock opens a dedicated
/// connection and runs `BEGIN EXCLUSIVE` with no busy wait; releasing rolls
/// back and closes it. The OS file lock disappears with the connection, so a
/// dead process never keeps a key locked.
pub struct SqliteSessionLock {
    dir: PathBuf,
    held: HashMap<u64, Connection>,
}

impl SqliteSessionLock {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            held: HashMap::new(),
        })
    }

    /// Whether this session currently holds `key`
    pub fn holds(&self, key: u64) -> bool {
        self.held.contains_key(&key)
    }

    fn lock_path(&self, key: u64) -> PathBuf {
        self.dir.join(format!("{:016x}.lock", key))
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

impl SessionLock for SqliteSessionLock {
    fn try_lock(&mut self, key: u64) -> Result<bool> {
        if self.held.contains_key(&key) {
            return Ok(false);
        }

        let conn = Connection::open(self.lock_path(key))
            .map_err(|e| TesseraError::Storage(e.to_string()))?;
        conn.busy_timeout(Duration::ZERO)
            .map_err(|e| TesseraError::Storage(e.to_string()))?;

        match conn.execute_batch("BEGIN EXCLUSIVE") {
            Ok(()) => {
                self.held.insert(key, conn);
                Ok(true)
            }
            Err(e) if is_busy(&e) => Ok(false),
            Err(e) => Err(TesseraError::Storage(e.to_string())),
        }
    }

    fn unlock(&mut self, key: u64) -> Result<bool> {
        match self.held.remove(&key) {
            Some(conn) => {
                conn.execute_batch("ROLLBACK")
                    .map_err(|e| TesseraError::Storage(e.to_string()))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// A pinned state connection and the session locks that go with it
pub struct ProjectionSession<L: SessionLock = SqliteSessionLock> {
    conn: Connection,
    locks: L,
}

impl<L: SessionLock> ProjectionSession<L> {
    pub fn new(conn: Connection, locks: L) -> Self {
        Self { conn, locks }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn parts_mut(&mut self) -> (&Connection, &mut L) {
        (&self.conn, &mut self.locks)
    }
}
