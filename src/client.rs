use crate::{DeliveryToken, Message, MessageClientError};
use async_trait::async_trait;
use std::time::Duration;

// This trait abstracts away message retrieval and disposal for a pull-based queue.
// Implementations will need to know the concrete queue API; the worker only ever
// asks for one message at a time and deletes by delivery token.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Returns at most `max` messages, waiting up to `wait` for one to show up.
    /// An empty vec means nothing was available, which is not an error.
    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<Message>, MessageClientError>;

    async fn delete(&self, delivery_token: &DeliveryToken) -> Result<(), MessageClientError>;
}
