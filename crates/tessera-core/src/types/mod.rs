pub mod event;
pub mod notification;
pub mod state;

pub use event::{Event, RecordedEvent};
pub use notification::Notification;
pub use state::{ProjectionState, ProjectionStatus};
