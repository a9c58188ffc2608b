use crate::{Message, MessageConsumer, MessageConsumptionOutcome, MessageSource, PollerError};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(5);

/// Single-message view over a [`MessageSource`].
pub struct Poller {
    source: Arc<dyn MessageSource>,
    wait_time: Duration,
}

impl Poller {
    pub fn new(source: Arc<dyn MessageSource>) -> Self {
        Self {
            source,
            wait_time: DEFAULT_WAIT_TIME,
        }
    }

    /// Long-poll wait used for every receive.
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    /// `Ok(None)` means the long poll came back empty.
    pub async fn receive_one(&self) -> Result<Option<Message>, PollerError> {
        let mut messages = self
            .source
            .receive(1, self.wait_time)
            .await
            .map_err(PollerError::Receive)?;
        if messages.len() > 1 {
            log::warn!(
                "Asked for one message but the source returned {}; keeping the first",
                messages.len()
            );
            messages.truncate(1);
        }
        Ok(messages.pop())
    }

    /// On failure the message is not cleared; the queue will hand it out again.
    pub async fn delete(&self, message: &Message) -> Result<(), PollerError> {
        self.source
            .delete(message.delivery_token())
            .await
            .map_err(PollerError::Delete)
    }

    /// Receives one message, runs `consumer` on it and deletes it only if the
    /// consumer succeeded. Returns `Ok(None)` when there was nothing to receive.
    pub async fn process_one(
        &self,
        consumer: &dyn MessageConsumer,
        cancel: &CancellationToken,
    ) -> Result<Option<MessageConsumptionOutcome>, PollerError> {
        let Some(message) = self.receive_one().await? else {
            return Ok(None);
        };

        let outcome = consumer
            .consume(&message, cancel)
            .await
            .map_err(PollerError::Handler)?;

        self.delete(&message).await?;
        log::debug!("Processed message {} ({outcome:?}) and deleted it", message.id());
        Ok(Some(outcome))
    }
}
