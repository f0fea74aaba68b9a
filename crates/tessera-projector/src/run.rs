//! Completion tracking for a single run

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Counts work belonging to one run: notifications queued but not yet
/// handled, plus handler invocations in flight
///
/// A handler that re-queues does so before it returns, so the count only
/// reaches zero once no invocation is running and nothing is left in the
/// queue, including items a worker is holding back for their retry delay.
pub(crate) struct RunTracker {
    outstanding: Mutex<usize>,
    idle: CancellationToken,
}

impl RunTracker {
    pub(crate) fn new() -> Self {
        Self {
            outstanding: Mutex::new(0),
            idle: CancellationToken::new(),
        }
    }

    /// Cancelled once the run drains
    pub(crate) fn idle(&self) -> CancellationToken {
        self.idle.clone()
    }

    pub(crate) fn enter(&self) {
        *self.outstanding.lock() += 1;
    }

    pub(crate) fn exit(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.idle.cancel();
        }
    }
}
