//! Message queue abstraction used by the dispatcher.
//!
//! Delivery is at least once and unordered. A received message stays
//! invisible to other consumers until its visibility timeout lapses; only
//! [`MessageQueue::ack`] removes it.

mod memory;
mod sqs;

pub use memory::MemoryQueue;
pub use sqs::SqsQueue;

use crate::error::QueueResult;
use async_trait::async_trait;
use std::time::Duration;

/// Attribute carrying the reason a message was dead-lettered.
pub const FAILURE_REASON_ATTRIBUTE: &str = "failure_reason";
pub const SOURCE_QUEUE_ATTRIBUTE: &str = "source_queue";
pub const RECEIVE_COUNT_ATTRIBUTE: &str = "receive_count";

/// One delivery of a queued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    /// Handle for this delivery; a redelivery gets a new one.
    pub receipt: String,
    pub body: String,
    /// Deliveries so far, including this one.
    pub receive_count: u32,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Wait up to `wait` for at most `max_messages` deliveries.
    async fn receive(&self, max_messages: u32, wait: Duration) -> QueueResult<Vec<QueueMessage>>;

    /// Remove a delivered message for good.
    async fn ack(&self, message: &QueueMessage) -> QueueResult<()>;

    /// Keep a delivered message hidden for `timeout` from now.
    async fn extend_visibility(&self, message: &QueueMessage, timeout: Duration) -> QueueResult<()>;

    async fn send(&self, body: &str, attributes: &[(&str, String)]) -> QueueResult<()>;
}
