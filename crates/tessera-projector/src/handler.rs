use crate::queue::Trigger;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tessera_core::{error::Result, Notification};
use tokio_util::sync::CancellationToken;

/// Processes one notification
///
/// `None` asks for a rescan from the persisted position. Errors are logged
/// and counted by the dispatcher but never retried automatically; call the
/// trigger to run again.
#[async_trait]
pub trait NotificationHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        cancel: &CancellationToken,
        notification: Option<Notification>,
        trigger: Trigger,
    ) -> Result<()>;
}

#[async_trait]
impl<H: NotificationHandler + ?Sized> NotificationHandler for Arc<H> {
    async fn handle(
        &self,
        cancel: &CancellationToken,
        notification: Option<Notification>,
        trigger: Trigger,
    ) -> Result<()> {
        (**self).handle(cancel, notification, trigger).await
    }
}

/// Handler backed by an async closure, see [`handler_fn`]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as a [`NotificationHandler`]
///
/// ```ignore
/// let handler = handler_fn(|_cancel, notification, _trigger| async move {
///     tracing::info!(?notification, "received");
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(CancellationToken, Option<Notification>, Trigger) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> NotificationHandler for HandlerFn<F>
where
    F: Fn(CancellationToken, Option<Notification>, Trigger) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        cancel: &CancellationToken,
        notification: Option<Notification>,
        trigger: Trigger,
    ) -> Result<()> {
        (self.f)(cancel.clone(), notification, trigger).await
    }
}
