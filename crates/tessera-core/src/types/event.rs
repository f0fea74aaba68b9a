use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An event to append to a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, e.g. "deposited"
    pub name: String,

    pub aggregate_id: String,

    /// Opaque payload
    pub payload: Vec<u8>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            aggregate_id: aggregate_id.into(),
            payload: payload.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An event together with its position in the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub position: i64,
    pub event: Event,
}
