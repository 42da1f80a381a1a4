//! # Message Handlers
//!
//! What a consumer runs for each text message.

use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

/// Error type handlers report back to the provider.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Callback invoked once per delivered message.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: String) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    async fn handle(&self, message: String) -> Result<(), HandlerError> {
        (**self).handle(message).await
    }
}

/// Adapts an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap `f` as a handler.
///
/// ```ignore
/// let tag = provider.consume(handler_fn(|msg| async move {
///     tracing::info!(%msg, "received");
///     Ok(())
/// })).await?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: String) -> Result<(), HandlerError> {
        (self.f)(message).await
    }
}
