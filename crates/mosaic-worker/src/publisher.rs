use async_trait::async_trait;
use mosaic_core::models::UploadReadyMessage;
use mosaic_orchestrator::UploadReadyPublisher;
use std::sync::Arc;

use crate::queue::MessageQueue;

/// Publishes ingest triggers as JSON onto the upload-ready queue.
pub struct QueuePublisher {
    queue: Arc<dyn MessageQueue>,
}

impl QueuePublisher {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl UploadReadyPublisher for QueuePublisher {
    async fn publish(&self, message: &UploadReadyMessage) -> anyhow::Result<()> {
        let body = serde_json::to_string(message)?;
        self.queue.send(&body, &[]).await?;
        Ok(())
    }
}
