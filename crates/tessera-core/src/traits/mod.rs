pub mod event_store;
pub mod lock;
pub mod projection;

pub use event_store::{EventFilter, EventStore};
pub use lock::SessionLock;
pub use projection::Projection;
