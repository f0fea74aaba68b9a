use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A hint that events may exist at or after `no` in some stream
///
/// Carries no payload. An absent notification (`Option::None` wherever one is
/// accepted) means "rescan from the persisted position".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Sequence number of the appended event
    pub no: i64,

    /// Aggregate the appended event belongs to
    pub aggregate_id: String,

    /// The notification must not be handled before this instant
    pub valid_after: DateTime<Utc>,
}

impl Notification {
    pub fn new(no: i64, aggregate_id: impl Into<String>) -> Self {
        Self {
            no,
            aggregate_id: aggregate_id.into(),
            valid_after: Utc::now(),
        }
    }

    /// Returns a copy that becomes valid `delay` from now
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.valid_after = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self
    }

    /// Whether the notification may be handled at `now`
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.valid_after <= now
    }

    /// Time left until the notification becomes valid
    pub fn remaining_delay(&self, now: DateTime<Utc>) -> Duration {
        (self.valid_after - now).to_std().unwrap_or(Duration::ZERO)
    }
}
