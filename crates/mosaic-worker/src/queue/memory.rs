use super::{MessageQueue, QueueMessage};
use crate::error::QueueResult;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Poll step while waiting for a message to become visible.
const POLL_STEP: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
struct Entry {
    message_id: String,
    body: String,
    attributes: Vec<(String, String)>,
    receive_count: u32,
    visible_at: Instant,
    receipt: Option<String>,
}

/// In-process queue with SQS-like visibility semantics, for tests and
/// single-node development.
pub struct MemoryQueue {
    name: String,
    visibility_timeout: Duration,
    entries: Mutex<Vec<Entry>>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, visibility_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            visibility_timeout,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Messages not yet acknowledged, visible or in flight.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Bodies and attributes of every stored message, oldest first.
    pub async fn snapshot(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|e| (e.body.clone(), e.attributes.clone()))
            .collect()
    }

    /// Make every in-flight message visible again.
    pub async fn expire_visibility(&self) {
        let now = Instant::now();
        for entry in self.entries.lock().await.iter_mut() {
            entry.visible_at = now;
        }
    }

    async fn take_visible(&self, max_messages: u32) -> Vec<QueueMessage> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries
            .iter_mut()
            .filter(|e| e.visible_at <= now)
            .take(max_messages.max(1) as usize)
            .map(|entry| {
                let receipt = Uuid::new_v4().to_string();
                entry.receive_count += 1;
                entry.visible_at = now + self.visibility_timeout;
                entry.receipt = Some(receipt.clone());
                QueueMessage {
                    message_id: entry.message_id.clone(),
                    receipt,
                    body: entry.body.clone(),
                    receive_count: entry.receive_count,
                }
            })
            .collect()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, max_messages: u32, wait: Duration) -> QueueResult<Vec<QueueMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let messages = self.take_visible(max_messages).await;
            if !messages.is_empty() || Instant::now() >= deadline {
                return Ok(messages);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(POLL_STEP.min(remaining)).await;
        }
    }

    async fn ack(&self, message: &QueueMessage) -> QueueResult<()> {
        // A stale receipt means the message was redelivered meanwhile; keep it.
        self.entries
            .lock()
            .await
            .retain(|e| e.receipt.as_deref() != Some(message.receipt.as_str()));
        Ok(())
    }

    async fn extend_visibility(&self, message: &QueueMessage, timeout: Duration) -> QueueResult<()> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.receipt.as_deref() == Some(message.receipt.as_str()))
        {
            entry.visible_at = Instant::now() + timeout;
        }
        Ok(())
    }

    async fn send(&self, body: &str, attributes: &[(&str, String)]) -> QueueResult<()> {
        self.entries.lock().await.push(Entry {
            message_id: Uuid::new_v4().to_string(),
            body: body.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            receive_count: 0,
            visible_at: Instant::now(),
            receipt: None,
        });
        Ok(())
    }
}
