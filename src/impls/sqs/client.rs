use crate::{config::WorkerConfig, DeliveryToken, Message, MessageClientError, MessageSource};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::{config::Credentials, error::DisplayErrorContext, Client};
use std::time::Duration;

// SQS caps both of these
const MAX_BATCH: usize = 10;
const MAX_WAIT_SECONDS: u64 = 20;

pub struct SqsMessageSource {
    sqs_client: Client,
    queue_url: String,
}

impl SqsMessageSource {
    pub fn new(sqs_client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            sqs_client,
            queue_url: queue_url.into(),
        }
    }

    /// Builds a client for the configured region. With an endpoint override (a
    /// local emulator, say) the configured static credentials are used instead of
    /// the default credential chain.
    pub async fn init(config: &WorkerConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.aws_region.clone()));
        if config.sqs_endpoint.is_some() {
            loader = loader.credentials_provider(Credentials::new(
                config.aws_access_key.clone(),
                config.aws_secret_key.clone(),
                None,
                None,
                "worker-config",
            ));
        }
        let sdk_config = loader.load().await;

        let mut sqs_config = aws_sdk_sqs::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.sqs_endpoint {
            sqs_config = sqs_config.endpoint_url(endpoint);
        }
        Self::new(Client::from_conf(sqs_config.build()), config.queue_url.clone())
    }
}

#[async_trait]
impl MessageSource for SqsMessageSource {
    async fn receive(
        &self,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Message>, MessageClientError> {
        let max = max.clamp(1, MAX_BATCH) as i32;
        let wait_seconds = wait.as_secs().min(MAX_WAIT_SECONDS) as i32;

        let output = self
            .sqs_client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max)
            .wait_time_seconds(wait_seconds)
            .send()
            .await
            .map_err(|e| MessageClientError::Transient(DisplayErrorContext(&e).to_string()))?;

        let messages = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|sqs_message| match Message::try_from(sqs_message) {
                Ok(message) => Some(message),
                Err(e) => {
                    log::error!("Dropping undeletable message: {e}");
                    None
                }
            })
            .collect();
        Ok(messages)
    }

    async fn delete(&self, delivery_token: &DeliveryToken) -> Result<(), MessageClientError> {
        self.sqs_client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(delivery_token.as_str())
            .send()
            .await
            .map_err(|e| MessageClientError::Transient(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}
