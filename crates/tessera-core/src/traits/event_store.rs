//! Event store contract
//!
//! Only the read side matters to a projection; appending is here so tests and
//! embedded setups can drive a store end to end.

use crate::error::Result;
use crate::types::{Event, RecordedEvent};

/// Predicate selecting which events a load returns
pub type EventFilter = dyn Fn(&Event) -> bool + Send + Sync;

pub trait EventStore: Send + Sync {
    /// Create an empty stream
    fn create(&self, stream: &str) -> Result<()>;

    /// Whether the stream exists
    fn has_stream(&self, stream: &str) -> bool;

    /// Append events, returning the position of the last one appended
    fn append_to(&self, stream: &str, events: Vec<Event>) -> Result<i64>;

    /// Load events at or after `from_position`, in order
    ///
    /// Positions are 1-based. `count` caps the number of events returned
    /// after filtering.
    fn load_from(
        &self,
        stream: &str,
        from_position: i64,
        count: Option<usize>,
        filter: Option<&EventFilter>,
    ) -> Result<Vec<RecordedEvent>>;
}
