use crate::Message;
use async_trait::async_trait;
use std::{error::Error, future::Future, time::Duration};
use tokio_util::sync::CancellationToken;

/// Distinguishing between messages that were actually processed vs ignored
/// can be helpful for tracing and reporting. Both will be deleted from the
/// queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageConsumptionOutcome {
    Succeeded,
    Ignored,
}

/// Any error leaves the message on the queue; it comes back once the queue's
/// own visibility timeout lapses.
#[derive(Debug, thiserror::Error)]
pub enum MessageConsumptionError {
    #[error("consumer failed: {0}")]
    Failed(#[source] Box<dyn Error + Send + Sync>),

    #[error("consumer timed out after {0:?}")]
    TimedOut(Duration),

    #[error("consumer panicked: {0}")]
    Panicked(String),
}

impl MessageConsumptionError {
    pub fn failed(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Failed(err.into())
    }
}

/// The business logic run for every received message.
///
/// `cancel` fires when the worker is shutting down; long-running consumers should
/// watch it and bail out early. Bailing out with an error keeps the message on
/// the queue.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    async fn consume(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<MessageConsumptionOutcome, MessageConsumptionError>;
}

/// Adapts an async closure into a [`MessageConsumer`].
pub struct ConsumerFn<F> {
    f: F,
}

pub fn consumer_fn<F, Fut>(f: F) -> ConsumerFn<F>
where
    F: Fn(Message, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<MessageConsumptionOutcome, MessageConsumptionError>>
        + Send
        + 'static,
{
    ConsumerFn { f }
}

#[async_trait]
impl<F, Fut> MessageConsumer for ConsumerFn<F>
where
    F: Fn(Message, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<MessageConsumptionOutcome, MessageConsumptionError>>
        + Send
        + 'static,
{
    async fn consume(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<MessageConsumptionOutcome, MessageConsumptionError> {
        (self.f)(message.clone(), cancel.clone()).await
    }
}
