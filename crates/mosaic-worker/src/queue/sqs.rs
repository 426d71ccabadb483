use super::{MessageQueue, QueueMessage};
use crate::error::{QueueError, QueueResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{Message, MessageAttributeValue, MessageSystemAttributeName};
use aws_sdk_sqs::Client as SqsClient;
use std::time::Duration;

/// SQS caps long polling at 20 seconds and batches at 10 messages.
const MAX_WAIT_SECS: u64 = 20;
const MAX_BATCH: u32 = 10;
/// Upper bound SQS accepts for a visibility timeout (12 hours).
const MAX_VISIBILITY_SECS: u64 = 12 * 60 * 60;

#[derive(Clone)]
pub struct SqsQueue {
    client: SqsClient,
    queue_url: String,
    name: String,
}

impl SqsQueue {
    pub async fn new(region: &str, queue_url: impl Into<String>) -> QueueResult<Self> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self::from_client(SqsClient::new(&sdk_config), queue_url)
    }

    pub fn from_client(client: SqsClient, queue_url: impl Into<String>) -> QueueResult<Self> {
        let queue_url = queue_url.into();
        if queue_url.trim().is_empty() {
            return Err(QueueError::Configuration("queue URL is empty".to_string()));
        }
        let name = queue_name(&queue_url).to_string();
        Ok(Self {
            client,
            queue_url,
            name,
        })
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

/// Last path segment of a queue URL.
fn queue_name(queue_url: &str) -> &str {
    queue_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(queue_url)
}

fn receive_count(message: &Message) -> u32 {
    message
        .attributes()
        .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse().ok())
        .unwrap_or(1)
}

fn to_queue_message(message: &Message) -> QueueResult<QueueMessage> {
    let message_id = message.message_id().unwrap_or_default().to_string();
    let receipt = message
        .receipt_handle()
        .ok_or_else(|| QueueError::MissingReceipt(message_id.clone()))?
        .to_string();
    Ok(QueueMessage {
        body: message.body().unwrap_or_default().to_string(),
        receive_count: receive_count(message),
        message_id,
        receipt,
    })
}

#[async_trait]
impl MessageQueue for SqsQueue {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self), fields(queue = %self.name))]
    async fn receive(&self, max_messages: u32, wait: Duration) -> QueueResult<Vec<QueueMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.clamp(1, MAX_BATCH) as i32)
            .wait_time_seconds(wait.as_secs().min(MAX_WAIT_SECS) as i32)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| QueueError::Provider(DisplayErrorContext(&e).to_string()))?;

        let mut messages = Vec::new();
        for message in output.messages() {
            match to_queue_message(message) {
                Ok(message) => messages.push(message),
                Err(e) => tracing::warn!(error = %e, "Skipping undeliverable SQS message"),
            }
        }
        Ok(messages)
    }

    async fn ack(&self, message: &QueueMessage) -> QueueResult<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt)
            .send()
            .await
            .map_err(|e| QueueError::Provider(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn extend_visibility(&self, message: &QueueMessage, timeout: Duration) -> QueueResult<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt)
            .visibility_timeout(timeout.as_secs().min(MAX_VISIBILITY_SECS) as i32)
            .send()
            .await
            .map_err(|e| QueueError::Provider(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn send(&self, body: &str, attributes: &[(&str, String)]) -> QueueResult<()> {
        let mut request = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body);
        for (name, value) in attributes {
            let value = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(|e| QueueError::Provider(e.to_string()))?;
            request = request.message_attributes(*name, value);
        }

        request
            .send()
            .await
            .map_err(|e| QueueError::Provider(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SqsClient {
        let config = aws_sdk_sqs::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_sdk_sqs::config::Region::new("us-east-1"))
            .build();
        SqsClient::from_conf(config)
    }

    #[test]
    fn test_queue_name_from_url() {
        let queue = SqsQueue::from_client(
            client(),
            "https://sqs.us-east-1.amazonaws.com/123456789012/mosaic-upload-ready",
        )
        .unwrap();
        assert_eq!(queue.name(), "mosaic-upload-ready");
        assert!(SqsQueue::from_client(client(), " ").is_err());
    }

    #[test]
    fn test_receive_count_attribute() {
        let message = Message::builder()
            .message_id("m-1")
            .receipt_handle("r-1")
            .body("{}")
            .attributes(MessageSystemAttributeName::ApproximateReceiveCount, "4")
            .build();
        let converted = to_queue_message(&message).unwrap();
        assert_eq!(converted.receive_count, 4);
        assert_eq!(converted.receipt, "r-1");

        let bare = Message::builder().message_id("m-2").build();
        assert!(matches!(
            to_queue_message(&bare),
            Err(QueueError::MissingReceipt(_))
        ));
        assert_eq!(receive_count(&bare), 1);
    }
}
