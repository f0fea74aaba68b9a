//! Metrics sink for the notification dispatcher

use crate::observe;
use crate::types::Notification;

/// Receives dispatcher lifecycle events
///
/// `None` notifications are rescans.
pub trait Metrics: Send + Sync {
    fn queue_notification(&self, notification: Option<&Notification>);

    fn start_notification_processing(&self, notification: Option<&Notification>);

    fn finish_notification_processing(&self, notification: Option<&Notification>, success: bool);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NopMetrics;

impl Metrics for NopMetrics {
    fn queue_notification(&self, _notification: Option<&Notification>) {}

    fn start_notification_processing(&self, _notification: Option<&Notification>) {}

    fn finish_notification_processing(
        &self,
        _notification: Option<&Notification>,
        _success: bool,
    ) {
    }
}

/// Forwards to the `metrics` crate when the `observe` feature is enabled
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordedMetrics;

impl Metrics for RecordedMetrics {
    fn queue_notification(&self, notification: Option<&Notification>) {
        observe::record_queued(notification.is_none());
    }

    fn start_notification_processing(&self, _notification: Option<&Notification>) {
        observe::record_processing_started();
    }

    fn finish_notification_processing(&self, _notification: Option<&Notification>, success: bool) {
        observe::record_processing_finished(success);
    }
}
