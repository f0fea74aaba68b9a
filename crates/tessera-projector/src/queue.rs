use crate::run::RunTracker;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{
    error::{Result, TesseraError},
    Metrics, Notification,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Producer side of the dispatcher's bounded queue
///
/// Cheap to clone; every clone feeds the same workers.
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Option<Notification>>,
    shutdown: CancellationToken,
    retry_delay: Duration,
    metrics: Arc<dyn Metrics>,
    tracker: Option<Arc<RunTracker>>,
}

impl NotificationQueue {
    pub(crate) fn new(
        sender: mpsc::Sender<Option<Notification>>,
        shutdown: CancellationToken,
        retry_delay: Duration,
        metrics: Arc<dyn Metrics>,
        tracker: Option<Arc<RunTracker>>,
    ) -> Self {
        Self {
            sender,
            shutdown,
            retry_delay,
            metrics,
            tracker,
        }
    }

    /// Enqueue a notification, `None` meaning a rescan
    ///
    /// Waits while the queue is full.
    ///
    /// # Errors
    ///
    /// - `Cancelled` when `cancel` fires first
    /// - `Stopped` once the dispatcher has begun shutting down
    pub async fn queue(
        &self,
        cancel: &CancellationToken,
        notification: Option<Notification>,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(TesseraError::Cancelled);
        }
        if self.shutdown.is_cancelled() {
            return Err(TesseraError::Stopped);
        }

        // Count before sending: a worker may finish the entry before send returns
        if let Some(tracker) = &self.tracker {
            tracker.enter();
        }

        let metrics_ref = notification.clone();
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TesseraError::Cancelled),
            _ = self.shutdown.cancelled() => Err(TesseraError::Stopped),
            sent = self.sender.send(notification) => sent.map_err(|_| TesseraError::Stopped),
        };

        match sent {
            Ok(()) => {
                self.metrics.queue_notification(metrics_ref.as_ref());
                Ok(())
            }
            Err(e) => {
                if let Some(tracker) = &self.tracker {
                    tracker.exit();
                }
                Err(e)
            }
        }
    }

    /// Enqueue a notification that may not run before the retry delay elapses
    ///
    /// A rescan (`None`) has no position to hold back and is queued as is.
    pub async fn requeue(
        &self,
        cancel: &CancellationToken,
        notification: Option<Notification>,
    ) -> Result<()> {
        let notification = notification.map(|n| n.delayed(self.retry_delay));
        self.queue(cancel, notification).await
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Whether the dispatcher has begun shutting down
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Put an entry back on the tail without waiting; for worker backoff only
    pub(crate) fn push_back(
        &self,
        entry: Option<Notification>,
    ) -> std::result::Result<(), TrySendError<Option<Notification>>> {
        self.sender.try_send(entry)
    }

    /// Mark one queued entry as fully handled
    pub(crate) fn complete(&self) {
        if let Some(tracker) = &self.tracker {
            tracker.exit();
        }
    }
}

/// Resubmits work from inside a handler
///
/// A handler gets the immediate variant for a rescan and the delayed variant
/// (retry delay applied) for a positional notification.
#[derive(Clone)]
pub struct Trigger {
    queue: NotificationQueue,
    delayed: bool,
}

impl Trigger {
    pub(crate) fn immediate(queue: NotificationQueue) -> Self {
        Self {
            queue,
            delayed: false,
        }
    }

    pub(crate) fn delayed(queue: NotificationQueue) -> Self {
        Self {
            queue,
            delayed: true,
        }
    }

    pub fn is_delayed(&self) -> bool {
        self.delayed
    }

    /// Delay a delayed trigger applies before the notification may run again
    pub fn retry_delay(&self) -> Duration {
        self.queue.retry_delay()
    }

    pub async fn fire(
        &self,
        cancel: &CancellationToken,
        notification: Option<Notification>,
    ) -> Result<()> {
        if self.delayed {
            self.queue.requeue(cancel, notification).await
        } else {
            self.queue.queue(cancel, notification).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tessera_core::NopMetrics;

    fn queue_with_capacity(
        capacity: usize,
    ) -> (
        NotificationQueue,
        mpsc::Receiver<Option<Notification>>,
        CancellationToken,
    ) {
        let (sender, receiver) = mpsc::channel(capacity);
        let shutdown = CancellationToken::new();
        let queue = NotificationQueue::new(
            sender,
            shutdown.clone(),
            Duration::from_millis(50),
            Arc::new(NopMetrics),
            None,
        );
        (queue, receiver, shutdown)
    }

    #[tokio::test]
    async fn test_requeue_sets_valid_after() {
        let (queue, mut receiver, _shutdown) = queue_with_capacity(4);
        let cancel = CancellationToken::new();

        let before = Utc::now();
        queue
            .requeue(&cancel, Some(Notification::new(3, "agg")))
            .await
            .unwrap();
        let after = Utc::now();

        let queued = receiver.recv().await.unwrap().unwrap();
        assert!(queued.valid_after >= before + chrono::Duration::milliseconds(50));
        assert!(queued.valid_after <= after + chrono::Duration::milliseconds(50));
    }

    #[tokio::test]
    async fn test_requeue_rescan_is_immediate() {
        let (queue, mut receiver, _shutdown) = queue_with_capacity(4);
        let cancel = CancellationToken::new();

        queue.requeue(&cancel, None).await.unwrap();
        assert_eq!(receiver.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancelled_and_stopped() {
        let (queue, _receiver, shutdown) = queue_with_capacity(4);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            queue.queue(&cancel, None).await,
            Err(TesseraError::Cancelled)
        ));

        shutdown.cancel();
        assert!(queue.is_stopped());
        assert!(matches!(
            queue.queue(&CancellationToken::new(), None).await,
            Err(TesseraError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_full_queue_waits_for_cancel() {
        let (queue, _receiver, _shutdown) = queue_with_capacity(1);
        let cancel = CancellationToken::new();
        queue.queue(&cancel, None).await.unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        assert!(matches!(
            queue.queue(&cancel, None).await,
            Err(TesseraError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_trigger_variants() {
        let (queue, mut receiver, _shutdown) = queue_with_capacity(4);
        let cancel = CancellationToken::new();

        let now = Utc::now();
        Trigger::immediate(queue.clone())
            .fire(&cancel, Some(Notification::new(1, "agg")))
            .await
            .unwrap();
        let immediate = receiver.recv().await.unwrap().unwrap();
        assert!(immediate.is_ready(now + chrono::Duration::milliseconds(10)));

        let trigger = Trigger::delayed(queue);
        assert!(trigger.is_delayed());
        assert_eq!(trigger.retry_delay(), Duration::from_millis(50));
        trigger
            .fire(&cancel, Some(Notification::new(1, "agg")))
            .await
            .unwrap();
        let delayed = receiver.recv().await.unwrap().unwrap();
        assert!(!delayed.is_ready(now + chrono::Duration::milliseconds(40)));
    }
}
