use crate::{DeliveryToken, Message, MessageClientError};
use aws_sdk_sqs::types::Message as SqsMessage;

impl TryFrom<SqsMessage> for Message {
    type Error = MessageClientError;

    // without a receipt handle the message could never be deleted
    fn try_from(value: SqsMessage) -> Result<Self, Self::Error> {
        let receipt_handle = value.receipt_handle.ok_or_else(|| {
            MessageClientError::Unrecoverable(format!(
                "message {:?} arrived without a receipt handle",
                value.message_id
            ))
        })?;
        Ok(Message::new(
            value.message_id.unwrap_or_default(),
            value.body.unwrap_or_default(),
            DeliveryToken::new(receipt_handle),
        ))
    }
}
