//! Tessera Projector: notification dispatch and stream projection
//!
//! Notifications are cursor hints ("events may exist at or after N"). The
//! [`NotificationDispatcher`] fans them out over a bounded queue to a fixed
//! pool of workers, each calling a [`NotificationHandler`]. Handlers get a
//! [`Trigger`] to resubmit work, immediately or after the retry delay.
//!
//! [`StreamProjector`] is the handler that keeps a projection current: it
//! takes the projection lock, applies new events and persists the result.

pub mod dispatcher;
pub mod handler;
pub mod projector;
pub mod queue;
mod run;

pub use dispatcher::{DispatcherHandle, NotificationDispatcher};
pub use handler::{handler_fn, HandlerFn, NotificationHandler};
pub use projector::StreamProjector;
pub use queue::{NotificationQueue, Trigger};
