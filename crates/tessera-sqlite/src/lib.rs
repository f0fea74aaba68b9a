//! SQLite-backed locked projection state store
//!
//! Keeps one `(position, state)` row per projection and guarantees at most
//! one writer per projection across processes.
//!
//! Locking is two-level:
//! - A session-scoped exclusion primitive: an exclusive SQLite transaction on
//!   a per-key lock file. The OS drops it when the session's connection
//!   closes or the process dies.
//! - A persisted `locked` flag, set after the primitive is taken and cleared
//!   on release. A flag found set while the primitive was free means a holder
//!   died mid-section; the projection is then reported as previously locked
//!   until an operator clears it.

pub mod schema;
pub mod session;
pub mod store;

pub use session::{ProjectionSession, SqliteSessionLock};
pub use store::{LockedProjectionStore, ProjectionLock};
