use crate::handler::NotificationHandler;
use crate::queue::{NotificationQueue, Trigger};
use crate::run::RunTracker;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tessera_core::{
    error::{Result, TesseraError},
    DispatcherConfig, Metrics, NopMetrics, Notification,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fans notifications out to a fixed pool of workers over one bounded queue
///
/// Delivery is at least once and unordered: a notification whose
/// `valid_after` lies in the future is put back on the tail of the queue, so
/// later entries may overtake it.
///
/// # Example
///
/// ```ignore
/// let dispatcher = NotificationDispatcher::new(DispatcherConfig::new().with_workers(4))?;
/// let handle = dispatcher.start(&cancel, Arc::new(handler))?;
/// handle.queue().queue(&cancel, Some(Notification::new(42, "order-7"))).await?;
/// handle.stop().await;
/// ```
pub struct NotificationDispatcher {
    config: DispatcherConfig,
    metrics: Arc<dyn Metrics>,
    started: AtomicBool,
}

impl NotificationDispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        Self::with_metrics(config, Arc::new(NopMetrics))
    }

    pub fn with_metrics(config: DispatcherConfig, metrics: Arc<dyn Metrics>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            metrics,
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Spawn the workers
    ///
    /// May be called once per dispatcher. Workers run until the returned
    /// handle is stopped or `cancel` fires.
    pub fn start<H: NotificationHandler>(
        &self,
        cancel: &CancellationToken,
        handler: Arc<H>,
    ) -> Result<DispatcherHandle> {
        self.mark_started()?;
        Ok(self.spawn_workers(cancel, handler, None))
    }

    /// Run one notification and everything it transitively queues
    ///
    /// Starts the dispatcher, queues `notification` and waits until no
    /// handler is running and nothing is left in the queue, or until
    /// `cancel` fires. Then stops the dispatcher. Handler failures are not
    /// reported here; only a failure to queue the first notification is.
    pub async fn execute<H: NotificationHandler>(
        &self,
        cancel: &CancellationToken,
        handler: Arc<H>,
        notification: Option<Notification>,
    ) -> Result<()> {
        self.mark_started()?;

        let tracker = Arc::new(RunTracker::new());
        let idle = tracker.idle();
        let handle = self.spawn_workers(cancel, handler, Some(tracker));

        if let Err(e) = handle.queue().queue(cancel, notification).await {
            handle.stop().await;
            return Err(e);
        }

        tokio::select! {
            _ = idle.cancelled() => {}
            _ = cancel.cancelled() => {}
        }

        handle.stop().await;
        Ok(())
    }

    fn mark_started(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TesseraError::AlreadyStarted);
        }
        Ok(())
    }

    fn spawn_workers<H: NotificationHandler>(
        &self,
        cancel: &CancellationToken,
        handler: Arc<H>,
        tracker: Option<Arc<RunTracker>>,
    ) -> DispatcherHandle {
        let (sender, receiver) = mpsc::channel(self.config.queue_capacity);
        let shutdown = CancellationToken::new();
        let queue = NotificationQueue::new(
            sender,
            shutdown.clone(),
            self.config.retry_delay(),
            self.metrics.clone(),
            tracker,
        );
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..self.config.workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: queue.clone(),
                    receiver: receiver.clone(),
                    handler: handler.clone(),
                    metrics: self.metrics.clone(),
                    cancel: cancel.clone(),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        tracing::debug!(workers = self.config.workers, "notification dispatcher started");

        DispatcherHandle {
            queue,
            shutdown,
            workers,
        }
    }
}

/// Running dispatcher
///
/// [`stop`](DispatcherHandle::stop) waits for in-flight handlers to finish;
/// notifications still queued at that point are dropped. Dropping the handle
/// without stopping signals shutdown but does not wait.
pub struct DispatcherHandle {
    queue: NotificationQueue,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl DispatcherHandle {
    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    pub async fn stop(mut self) {
        self.shutdown.cancel();

        for worker in std::mem::take(&mut self.workers) {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "notification worker failed");
            }
        }

        tracing::debug!("notification dispatcher stopped");
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

enum Backoff {
    /// Back on the queue tail
    Requeued,
    /// Could not be put back; handle it now
    Due(Option<Notification>),
    Shutdown,
}

struct Worker<H> {
    id: usize,
    queue: NotificationQueue,
    receiver: Arc<Mutex<mpsc::Receiver<Option<Notification>>>>,
    handler: Arc<H>,
    metrics: Arc<dyn Metrics>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
}

impl<H: NotificationHandler> Worker<H> {
    async fn run(self) {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                _ = self.cancel.cancelled() => return,
                received = self.next() => received,
            };
            let Some(entry) = received else {
                return;
            };

            let waiting = entry.as_ref().is_some_and(|n| !n.is_ready(Utc::now()));
            let entry = if waiting {
                match self.back_off(entry).await {
                    Backoff::Requeued => continue,
                    Backoff::Due(entry) => entry,
                    Backoff::Shutdown => return,
                }
            } else {
                entry
            };

            let trigger = match entry {
                Some(_) => Trigger::delayed(self.queue.clone()),
                None => Trigger::immediate(self.queue.clone()),
            };
            self.process(entry, trigger).await;
            self.queue.complete();
        }
    }

    async fn next(&self) -> Option<Option<Notification>> {
        self.receiver.lock().await.recv().await
    }

    /// Put a not-yet-valid entry back and move on
    ///
    /// When the queue is full the entry cannot go back without this worker
    /// blocking on its own queue, so it waits out the delay instead.
    async fn back_off(&self, entry: Option<Notification>) -> Backoff {
        match self.queue.push_back(entry) {
            Ok(()) => {
                tokio::task::yield_now().await;
                Backoff::Requeued
            }
            Err(mpsc::error::TrySendError::Full(entry)) => {
                let delay = entry
                    .as_ref()
                    .map(|n| n.remaining_delay(Utc::now()))
                    .unwrap_or_default();
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => Backoff::Shutdown,
                    _ = self.cancel.cancelled() => Backoff::Shutdown,
                    _ = tokio::time::sleep(delay) => Backoff::Due(entry),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Backoff::Shutdown,
        }
    }

    async fn process(&self, notification: Option<Notification>, trigger: Trigger) {
        self.metrics
            .start_notification_processing(notification.as_ref());

        match self
            .handler
            .handle(&self.cancel, notification.clone(), trigger)
            .await
        {
            Ok(()) => {
                self.metrics
                    .finish_notification_processing(notification.as_ref(), true);
            }
            Err(e) => {
                tracing::error!(
                    worker = self.id,
                    error = %e,
                    notification = ?notification,
                    "the notification handler produced an error"
                );
                self.metrics
                    .finish_notification_processing(notification.as_ref(), false);
            }
        }
    }
}
