use crate::schema;
use crate::session::{ProjectionSession, SqliteSessionLock};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::time::Duration;
use tessera_core::{
    error::{Result, TesseraError},
    traits::SessionLock,
    types::{Notification, ProjectionState, ProjectionStatus},
    ProjectionStoreConfig,
};
use xxhash_rust::xxh3::xxh3_64;

struct Row {
    locked: bool,
    position: i64,
    state: Vec<u8>,
}

/// Durable `(position, state)` storage for one projection, guarded by a
/// session-scoped lock and a persisted `locked` flag
///
/// Per-row state machine:
///
/// ```text
/// Idle(locked=0) --acquire--> Locked(locked=1) --release--> Idle
/// Locked --holder dies--> Stuck(locked=1, primitive free)
/// Stuck --acquire--> PreviouslyLocked, stays Stuck until clear_stuck_flag
/// ```
pub struct LockedProjectionStore {
    config: ProjectionStoreConfig,
    lock_key: u64,
    select_row: String,
    set_locked: String,
    persist_state: String,
}

impl LockedProjectionStore {
    /// Open the store, creating the table and the projection row if needed
    pub fn open(config: ProjectionStoreConfig) -> Result<Self> {
        config.validate()?;

        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::create_dir_all(config.lock_dir())?;

        let conn = Self::open_connection(&config)?;
        schema::ensure_table(&conn, &config.table)?;
        let row_no = schema::register_projection(&conn, &config.table, &config.projection)?;

        let table = &config.table;
        Ok(Self {
            lock_key: lock_key(table, row_no),
            select_row: format!("SELECT locked, position, state FROM \"{table}\" WHERE name = ?1"),
            set_locked: format!("UPDATE \"{table}\" SET locked = ?2 WHERE name = ?1"),
            persist_state: format!(
                "UPDATE \"{table}\" SET position = ?1, state = ?2 WHERE name = ?3 AND position <= ?1"
            ),
            config,
        })
    }

    fn open_connection(config: &ProjectionStoreConfig) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|e| TesseraError::Storage(e.to_string()))?;

        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| TesseraError::Config(e.to_string()))?;
        conn.pragma_update(None, "synchronous", config.synchronous.as_pragma())
            .map_err(|e| TesseraError::Config(e.to_string()))?;

        Ok(conn)
    }

    /// Open a session backed by lock files in the configured lock directory
    pub fn connect(&self) -> Result<ProjectionSession> {
        self.connect_with(SqliteSessionLock::new(self.config.lock_dir())?)
    }

    /// Open a session using a caller-supplied exclusion primitive
    pub fn connect_with<L: SessionLock>(&self, locks: L) -> Result<ProjectionSession<L>> {
        Ok(ProjectionSession::new(
            Self::open_connection(&self.config)?,
            locks,
        ))
    }

    pub fn projection_name(&self) -> &str {
        &self.config.projection
    }

    pub fn config(&self) -> &ProjectionStoreConfig {
        &self.config
    }

    /// Key of this projection's exclusion primitive
    pub fn lock_key(&self) -> u64 {
        self.lock_key
    }

    /// Take the projection lock and return the last persisted state
    ///
    /// With a notification, the lock is only attempted while the persisted
    /// position is behind `notification.no`; otherwise this returns
    /// `NoProjectionRequired` without touching the exclusion primitive.
    /// Without one (a rescan) the lock is always attempted.
    ///
    /// # Errors
    ///
    /// - `FailedToLock` when another session holds the primitive
    /// - `PreviouslyLocked` when the flag was left set by a holder that never
    ///   released; the primitive is released again and the flag left set
    pub fn acquire<'s, L: SessionLock>(
        &'s self,
        session: &'s mut ProjectionSession<L>,
        notification: Option<&Notification>,
    ) -> Result<(ProjectionLock<'s, L>, ProjectionState)> {
        let projection = self.projection_name();

        if let Some(n) = notification {
            let row = self.read_row(session.connection())?;
            if row.position >= n.no {
                return Err(TesseraError::NoProjectionRequired);
            }
        }

        {
            let (conn, locks) = session.parts_mut();
            if !locks.try_lock(self.lock_key)? {
                return Err(TesseraError::FailedToLock);
            }

            // The position may have moved between the check and the lock
            let row = match self.read_row(conn) {
                Ok(row) => row,
                Err(e) => {
                    self.unlock_logged(locks, notification);
                    return Err(e);
                }
            };

            if row.locked {
                tracing::warn!(
                    projection = %projection,
                    notification = ?notification,
                    "projection is locked by a holder that never released it"
                );
                self.unlock_logged(locks, notification);
                return Err(TesseraError::PreviouslyLocked {
                    projection: projection.to_string(),
                });
            }

            if let Some(n) = notification {
                if row.position >= n.no {
                    self.unlock_logged(locks, notification);
                    return Err(TesseraError::NoProjectionRequired);
                }
            }

            if let Err(e) = self.set_locked(conn, true) {
                if let Err(release_err) = self.release_lock(conn, locks) {
                    tracing::error!(
                        projection = %projection,
                        error = %release_err,
                        "failed to release lock while setting projection row as locked"
                    );
                }
                return Err(e);
            }

            tracing::debug!(
                projection = %projection,
                notification = ?notification,
                position = row.position,
                "acquired projection lock"
            );

            let state = ProjectionState::new(row.position, row.state);
            Ok((
                ProjectionLock {
                    store: self,
                    session,
                    notification: notification.cloned(),
                    released: false,
                },
                state,
            ))
        }
    }

    /// Durably write the projection's position and state
    ///
    /// Only call this while holding the lock from a successful `acquire`,
    /// on that lock's connection. The position never moves backwards.
    pub fn persist_state(
        &self,
        conn: &Connection,
        notification: Option<&Notification>,
        state: &ProjectionState,
    ) -> Result<()> {
        let updated = conn
            .execute(
                &self.persist_state,
                params![state.position, state.state, self.config.projection],
            )
            .map_err(|e| TesseraError::Storage(e.to_string()))?;

        if updated == 0 {
            let current = self.read_row(conn)?;
            return Err(TesseraError::InvalidState(format!(
                "projection {} cannot move from position {} back to {}",
                self.config.projection, current.position, state.position
            )));
        }

        tracing::debug!(
            projection = %self.config.projection,
            notification = ?notification,
            position = state.position,
            "updated projection state"
        );

        Ok(())
    }

    /// Current position and lock flag, read on a fresh connection
    pub fn status(&self) -> Result<ProjectionStatus> {
        let conn = Self::open_connection(&self.config)?;
        let row = self.read_row(&conn)?;
        Ok(ProjectionStatus {
            position: row.position,
            locked: row.locked,
        })
    }

    /// Operator action: clear a flag left set by a holder that died
    ///
    /// Refuses with `FailedToLock` while a live holder has the primitive.
    /// Returns whether a stuck flag was actually cleared.
    pub fn clear_stuck_flag(&self) -> Result<bool> {
        let mut session = self.connect()?;
        let (conn, locks) = session.parts_mut();

        if !locks.try_lock(self.lock_key)? {
            return Err(TesseraError::FailedToLock);
        }

        let cleared = conn
            .execute(
                &format!(
                    "UPDATE \"{}\" SET locked = 0 WHERE name = ?1 AND locked = 1",
                    self.config.table
                ),
                params![self.config.projection],
            )
            .map_err(|e| TesseraError::Storage(e.to_string()));

        self.unlock_logged(locks, None);

        let cleared = cleared? > 0;
        if cleared {
            tracing::warn!(projection = %self.config.projection, "cleared stuck projection lock");
        }
        Ok(cleared)
    }

    fn read_row(&self, conn: &Connection) -> Result<Row> {
        conn.query_row(&self.select_row, params![self.config.projection], |row| {
            Ok(Row {
                locked: row.get(0)?,
                position: row.get(1)?,
                state: row.get(2)?,
            })
        })
        .optional()
        .map_err(|e| TesseraError::Storage(e.to_string()))?
        .ok_or_else(|| TesseraError::NotFound(format!("projection {}", self.config.projection)))
    }

    fn set_locked(&self, conn: &Connection, locked: bool) -> Result<()> {
        conn.execute(&self.set_locked, params![self.config.projection, locked])
            .map_err(|e| TesseraError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Clear the flag, then release the primitive
    ///
    /// The primitive is released even when clearing the flag fails; the
    /// flag then stays set and the next acquire reports the projection as
    /// previously locked.
    fn release_lock<L: SessionLock>(&self, conn: &Connection, locks: &mut L) -> Result<()> {
        let flag = self.set_locked(conn, false);
        let primitive = self.release_primitive(locks);
        flag.and(primitive)
    }

    fn release_primitive<L: SessionLock>(&self, locks: &mut L) -> Result<()> {
        if !locks.unlock(self.lock_key)? {
            return Err(TesseraError::InvalidState(
                "failed to release projection connection lock".into(),
            ));
        }
        Ok(())
    }

    fn unlock_logged<L: SessionLock>(&self, locks: &mut L, notification: Option<&Notification>) {
        match self.release_primitive(locks) {
            Ok(()) => tracing::debug!(
                projection = %self.config.projection,
                notification = ?notification,
                "released connection lock"
            ),
            Err(e) => tracing::error!(
                projection = %self.config.projection,
                notification = ?notification,
                error = %e,
                "failed to release connection lock"
            ),
        }
    }
}

/// Stable key for a projection row's exclusion primitive
fn lock_key(table: &str, row_no: i64) -> u64 {
    let mut bytes = Vec::with_capacity(table.len() + 9);
    bytes.extend_from_slice(table.as_bytes());
    bytes.push(0);
    bytes.extend_from_slice(&row_no.to_be_bytes());
    xxh3_64(&bytes)
}

/// Proof of holding a projection's lock
///
/// Released by [`ProjectionLock::release`] or on drop. Failures while
/// releasing are logged, not returned: the holder has already committed its
/// state and cannot roll it back.
pub struct ProjectionLock<'s, L: SessionLock = SqliteSessionLock> {
    store: &'s LockedProjectionStore,
    session: &'s mut ProjectionSession<L>,
    notification: Option<Notification>,
    released: bool,
}

impl<'s, L: SessionLock> std::fmt::Debug for ProjectionLock<'s, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionLock")
            .field("notification", &self.notification)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl<'s, L: SessionLock> ProjectionLock<'s, L> {
    /// The pinned connection holding the lock
    pub fn connection(&self) -> &Connection {
        self.session.connection()
    }

    /// Persist through the store on this lock's connection
    pub fn persist_state(&self, state: &ProjectionState) -> Result<()> {
        self.store
            .persist_state(self.connection(), self.notification.as_ref(), state)
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let (conn, locks) = self.session.parts_mut();
        match self.store.release_lock(conn, locks) {
            Ok(()) => tracing::debug!(
                projection = %self.store.projection_name(),
                notification = ?self.notification,
                "released projection lock"
            ),
            Err(e) => tracing::error!(
                projection = %self.store.projection_name(),
                notification = ?self.notification,
                error = %e,
                "failed to release projection"
            ),
        }
    }
}

impl<'s, L: SessionLock> Drop for ProjectionLock<'s, L> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> LockedProjectionStore {
        LockedProjectionStore::open(ProjectionStoreConfig::new(
            dir.path().join("state.db"),
            "balances",
        ))
        .unwrap()
    }

    #[test]
    fn test_lock_key_is_stable() {
        assert_eq!(lock_key("projections", 1), lock_key("projections", 1));
        assert_ne!(lock_key("projections", 1), lock_key("projections", 2));
        assert_ne!(lock_key("projections", 1), lock_key("other", 1));
    }

    #[test]
    fn test_fresh_projection_starts_at_zero() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut session = store.connect().unwrap();

        let (lock, state) = store.acquire(&mut session, None).unwrap();
        assert_eq!(state, ProjectionState::default());
        assert!(store.status().unwrap().locked);

        lock.release();
        assert!(!store.status().unwrap().locked);
    }

    #[test]
    fn test_reopen_keeps_row() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let key = store.lock_key();
        {
            let mut session = store.connect().unwrap();
            let (lock, _) = store.acquire(&mut session, None).unwrap();
            lock.persist_state(&ProjectionState::new(3, b"s".to_vec()))
                .unwrap();
        }
        drop(store);

        let reopened = open_store(&dir);
        assert_eq!(reopened.lock_key(), key);
        assert_eq!(reopened.status().unwrap().position, 3);
    }

    #[test]
    fn test_drop_releases_lock() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut a = store.connect().unwrap();
        let mut b = store.connect().unwrap();

        {
            let _held = store.acquire(&mut a, None).unwrap();
            assert!(matches!(
                store.acquire(&mut b, None),
                Err(TesseraError::FailedToLock)
            ));
        }

        assert!(!store.status().unwrap().locked);
        assert!(store.acquire(&mut b, None).is_ok());
    }

    #[test]
    fn test_persist_refuses_to_move_backwards() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut session = store.connect().unwrap();

        let (lock, _) = store.acquire(&mut session, None).unwrap();
        lock.persist_state(&ProjectionState::new(10, vec![1]))
            .unwrap();

        let err = lock
            .persist_state(&ProjectionState::new(4, vec![2]))
            .unwrap_err();
        assert!(matches!(err, TesseraError::InvalidState(_)));

        // Same position is allowed
        lock.persist_state(&ProjectionState::new(10, vec![3]))
            .unwrap();
        lock.release();

        assert_eq!(store.status().unwrap().position, 10);
    }

    #[test]
    fn test_invalid_table_rejected_at_open() {
        let dir = TempDir::new().unwrap();
        let cfg = ProjectionStoreConfig::new(dir.path().join("state.db"), "balances")
            .with_table("bad table");
        assert!(matches!(
            LockedProjectionStore::open(cfg),
            Err(TesseraError::InvalidArgument(_))
        ));
    }
}
