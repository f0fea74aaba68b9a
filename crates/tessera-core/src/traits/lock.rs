use crate::error::Result;

/// Session-scoped exclusion primitive
///
/// A lock taken through a `SessionLock` belongs to the session (connection)
/// that took it and must be released automatically when that session goes
/// away, including when the owning process dies. Keys are stable numeric
/// identifiers derived from the storage object and row being guarded.
///
/// Implementations are not required to be reentrant: locking a key the
/// session already holds may report `false`.
pub trait SessionLock: Send {
    /// Try to take the lock without waiting
    ///
    /// Returns `Ok(false)` when another session holds it.
    fn try_lock(&mut self, key: u64) -> Result<bool>;

    /// Release a lock held by this session
    ///
    /// Returns `Ok(false)` when the key was not held by this session.
    fn unlock(&mut self, key: u64) -> Result<bool>;
}

impl<L: SessionLock + ?Sized> SessionLock for Box<L> {
    fn try_lock(&mut self, key: u64) -> Result<bool> {
        (**self).try_lock(key)
    }

    fn unlock(&mut self, key: u64) -> Result<bool> {
        (**self).unlock(key)
    }
}
