//! In-memory event store
//!
//! Streams live in a map behind a single reader/writer lock. Loads take the
//! read lock, so concurrent projections do not serialize on each other.

use crate::error::{Result, TesseraError};
use crate::traits::{EventFilter, EventStore};
use crate::types::{Event, RecordedEvent};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<String, Vec<Event>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events in a stream
    pub fn len(&self, stream: &str) -> Result<usize> {
        self.streams
            .read()
            .get(stream)
            .map(Vec::len)
            .ok_or_else(|| TesseraError::StreamNotFound(stream.to_string()))
    }
}

impl EventStore for InMemoryEventStore {
    fn create(&self, stream: &str) -> Result<()> {
        let mut streams = self.streams.write();
        if streams.contains_key(stream) {
            return Err(TesseraError::StreamExistsAlready(stream.to_string()));
        }
        streams.insert(stream.to_string(), Vec::new());
        Ok(())
    }

    fn has_stream(&self, stream: &str) -> bool {
        self.streams.read().contains_key(stream)
    }

    fn append_to(&self, stream: &str, events: Vec<Event>) -> Result<i64> {
        let mut streams = self.streams.write();
        let stored = streams
            .get_mut(stream)
            .ok_or_else(|| TesseraError::StreamNotFound(stream.to_string()))?;

        stored.extend(events);
        Ok(stored.len() as i64)
    }

    fn load_from(
        &self,
        stream: &str,
        from_position: i64,
        count: Option<usize>,
        filter: Option<&EventFilter>,
    ) -> Result<Vec<RecordedEvent>> {
        let streams = self.streams.read();
        let stored = streams
            .get(stream)
            .ok_or_else(|| TesseraError::StreamNotFound(stream.to_string()))?;

        let skip = from_position.max(1) as usize - 1;
        let matching = stored
            .iter()
            .enumerate()
            .skip(skip)
            .filter(|(_, event)| filter.map_or(true, |f| f(event)))
            .map(|(idx, event)| RecordedEvent {
                position: idx as i64 + 1,
                event: event.clone(),
            });

        Ok(match count {
            Some(n) => matching.take(n).collect(),
            None => matching.collect(),
        })
    }
}
