//! Tessera Core: types and traits shared by the tessera projection crates
//!
//! A projection is a read model built by replaying an event stream. Tessera
//! keeps projections current by reacting to lightweight notifications
//! ("something may exist at or after position N") instead of polling.
//!
//! This crate defines:
//! - Notifications and persisted projection state
//! - The error taxonomy shared by the dispatcher and the state store
//! - Configuration for the dispatcher and the SQLite store
//! - The metrics sink consumed by the dispatcher
//! - The session-scoped exclusion primitive contract
//! - The event store contract, plus an in-memory implementation

pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod observe;
pub mod traits;
pub mod types;

pub use config::{DispatcherConfig, ProjectionStoreConfig, SynchronousMode};
pub use error::{Result, TesseraError};
pub use memory::InMemoryEventStore;
pub use metrics::{Metrics, NopMetrics, RecordedMetrics};
pub use traits::{EventFilter, EventStore, Projection, SessionLock};
pub use types::{Event, Notification, ProjectionState, ProjectionStatus, RecordedEvent};
