//! Optional metrics instrumentation.
//!
//! When the `observe` feature is enabled, dispatcher activity emits counters
//! and gauges via the [`metrics`] crate. A downstream application must
//! install a metrics recorder to collect the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

/// Record a queued notification.
///
/// - `tessera.notifications.queued_total` – counter with `kind` label (`rescan` / `position`)
#[inline]
pub fn record_queued(rescan: bool) {
    #[cfg(feature = "observe")]
    {
        let kind = if rescan { "rescan" } else { "position" };
        metrics::counter!("tessera.notifications.queued_total", "kind" => kind).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = rescan;
    }
}

/// Record a handler invocation starting.
///
/// - `tessera.notifications.in_flight` – gauge
#[inline]
pub fn record_processing_started() {
    #[cfg(feature = "observe")]
    {
        metrics::gauge!("tessera.notifications.in_flight").increment(1.0);
    }
}

/// Record a handler invocation finishing.
///
/// - `tessera.notifications.processed_total` – counter with `outcome` label
/// - `tessera.notifications.in_flight` – gauge
#[inline]
pub fn record_processing_finished(success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("tessera.notifications.processed_total", "outcome" => outcome)
            .increment(1);
        metrics::gauge!("tessera.notifications.in_flight").decrement(1.0);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = success;
    }
}
