use crate::dispatcher::NotificationDispatcher;
use crate::handler::NotificationHandler;
use crate::queue::{NotificationQueue, Trigger};
use async_trait::async_trait;
use std::sync::Arc;
use tessera_core::{
    error::{Result, TesseraError},
    DispatcherConfig, EventStore, Metrics, NopMetrics, Notification, Projection, ProjectionState,
};
use tessera_sqlite::LockedProjectionStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Keeps one projection current with its event stream
///
/// Each invocation takes the projection lock through the store, loads the
/// events after the persisted position, folds them into the state and
/// persists the result before releasing the lock. That work runs on the
/// blocking pool. Lock contention is answered by firing the trigger after
/// the retry delay; a projection left locked by a dead holder surfaces as
/// `PreviouslyLocked` and is not retried.
pub struct StreamProjector<P: Projection> {
    store: Arc<LockedProjectionStore>,
    events: Arc<dyn EventStore>,
    projection: Arc<P>,
    config: DispatcherConfig,
    metrics: Arc<dyn Metrics>,
}

impl<P: Projection + 'static> StreamProjector<P> {
    pub fn new(
        store: Arc<LockedProjectionStore>,
        events: Arc<dyn EventStore>,
        projection: P,
        config: DispatcherConfig,
    ) -> Result<Self> {
        config.validate()?;
        if store.projection_name() != projection.name() {
            return Err(TesseraError::InvalidArgument(format!(
                "store guards projection {} but the projection is named {}",
                store.projection_name(),
                projection.name()
            )));
        }

        Ok(Self {
            store,
            events,
            projection: Arc::new(projection),
            config,
            metrics: Arc::new(NopMetrics),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &LockedProjectionStore {
        &self.store
    }

    /// One complete catch-up pass, including anything re-queued on the way
    pub async fn run(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        let dispatcher =
            NotificationDispatcher::with_metrics(self.config.clone(), self.metrics.clone())?;
        dispatcher.execute(cancel, Arc::clone(self), None).await
    }

    /// Catch up, then follow `notifications` until cancelled or the sender
    /// side closes
    pub async fn run_and_listen(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        mut notifications: mpsc::Receiver<Notification>,
    ) -> Result<()> {
        let dispatcher =
            NotificationDispatcher::with_metrics(self.config.clone(), self.metrics.clone())?;
        let handle = dispatcher.start(cancel, Arc::clone(self))?;
        let listened = forward(handle.queue(), cancel, &mut notifications).await;
        handle.stop().await;

        match listened {
            Err(TesseraError::Cancelled) => Ok(()),
            other => other,
        }
    }

    async fn project_blocking(&self, notification: Option<Notification>) -> Result<()> {
        let store = self.store.clone();
        let events = self.events.clone();
        let projection = self.projection.clone();

        tokio::task::spawn_blocking(move || {
            project(&store, events.as_ref(), projection.as_ref(), notification.as_ref())
        })
        .await
        .map_err(|e| TesseraError::Internal(format!("Task join error: {}", e)))?
    }

    /// Re-queue after losing the lock race
    ///
    /// A rescan goes back through the immediate trigger, so the retry delay
    /// is waited out here first.
    async fn retry(
        &self,
        cancel: &CancellationToken,
        notification: Option<Notification>,
        trigger: Trigger,
    ) -> Result<()> {
        if notification.is_none() && !trigger.is_delayed() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(trigger.retry_delay()) => {}
            }
        }
        trigger.fire(cancel, notification).await
    }
}

fn project<P: Projection>(
    store: &LockedProjectionStore,
    events: &dyn EventStore,
    projection: &P,
    notification: Option<&Notification>,
) -> Result<()> {
    let mut session = store.connect()?;
    let (lock, acquired) = store.acquire(&mut session, notification)?;

    let mut state: P::State = if acquired.state.is_empty() {
        P::State::default()
    } else {
        serde_json::from_slice(&acquired.state)?
    };

    let loaded = events.load_from(projection.stream(), acquired.position + 1, None, None)?;
    let Some(last) = loaded.last().map(|e| e.position) else {
        lock.release();
        return Ok(());
    };

    for event in &loaded {
        state = projection.apply(state, event)?;
    }

    lock.persist_state(&ProjectionState::new(last, serde_json::to_vec(&state)?))?;
    lock.release();

    tracing::debug!(
        projection = %projection.name(),
        applied = loaded.len(),
        position = last,
        "projection caught up"
    );
    Ok(())
}

/// Queue a rescan, then every notification received
async fn forward(
    queue: &NotificationQueue,
    cancel: &CancellationToken,
    notifications: &mut mpsc::Receiver<Notification>,
) -> Result<()> {
    queue.queue(cancel, None).await?;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = notifications.recv() => next,
        };
        match next {
            Some(notification) => queue.queue(cancel, Some(notification)).await?,
            None => return Ok(()),
        }
    }
}

#[async_trait]
impl<P: Projection + 'static> NotificationHandler for StreamProjector<P> {
    async fn handle(
        &self,
        cancel: &CancellationToken,
        notification: Option<Notification>,
        trigger: Trigger,
    ) -> Result<()> {
        match self.project_blocking(notification.clone()).await {
            Ok(()) | Err(TesseraError::NoProjectionRequired) => Ok(()),
            Err(TesseraError::FailedToLock) => self.retry(cancel, notification, trigger).await,
            Err(e) => Err(e),
        }
    }
}
