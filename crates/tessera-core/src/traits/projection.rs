use crate::error::Result;
use crate::types::RecordedEvent;
use serde::{de::DeserializeOwned, Serialize};

/// Projection logic: folds events into a state
///
/// The state is persisted as JSON between runs; an empty blob decodes to
/// `State::default()`.
pub trait Projection: Send + Sync {
    type State: Serialize + DeserializeOwned + Default + Send;

    /// Name of the projection row this logic owns
    fn name(&self) -> &str;

    /// Stream the projection reads from
    fn stream(&self) -> &str;

    /// Apply one event to the state
    fn apply(&self, state: Self::State, event: &RecordedEvent) -> Result<Self::State>;
}
