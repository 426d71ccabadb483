//! Queue dispatcher: bounded worker pool over one queue.
//!
//! Each received message is handed to a [`MessageHandler`] on its own task.
//! Success acknowledges the message. A recoverable failure hides it again
//! for an exponential backoff so the queue redelivers it. An unrecoverable
//! failure, or a message received too many times, is moved to the
//! dead-letter queue.

use crate::handlers::MessageHandler;
use crate::queue::{
    MessageQueue, QueueMessage, FAILURE_REASON_ATTRIBUTE, RECEIVE_COUNT_ATTRIBUTE,
    SOURCE_QUEUE_ATTRIBUTE,
};
use mosaic_core::{DispatcherConfig, TaskError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};

/// Maximum delay in seconds before a failed message is redelivered.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Pause after a failed receive call before polling again.
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_secs(5);

/// Backoff in seconds for a message on its `receive_count`th delivery
/// (exponential with cap).
#[inline]
pub(crate) fn compute_retry_backoff_seconds(receive_count: u32) -> u64 {
    2_u64
        .checked_pow(receive_count)
        .unwrap_or(u64::MAX)
        .min(MAX_RETRY_BACKOFF_SECS)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Retry { backoff_secs: u64 },
    DeadLettered { reason: String },
}

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub max_receive_count: u32,
    pub wait_time: Duration,
    pub max_messages: u32,
    pub max_workers: usize,
    pub handler_timeout: Duration,
}

impl From<&DispatcherConfig> for DispatcherSettings {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            max_receive_count: config.max_receive_count,
            wait_time: Duration::from_secs(config.wait_time_secs),
            max_messages: config.max_messages,
            max_workers: config.max_workers.max(1),
            handler_timeout: Duration::from_secs(config.handler_timeout_secs),
        }
    }
}

pub struct QueueDispatcher {
    queue: Arc<dyn MessageQueue>,
    dead_letter: Option<Arc<dyn MessageQueue>>,
    handler: Arc<dyn MessageHandler>,
    settings: DispatcherSettings,
}

impl QueueDispatcher {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        dead_letter: Option<Arc<dyn MessageQueue>>,
        handler: Arc<dyn MessageHandler>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            queue,
            dead_letter,
            handler,
            settings,
        }
    }

    /// Receive and dispatch until `shutdown` flips to true, then wait for
    /// in-flight messages to finish.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_workers));

        tracing::info!(
            queue = %self.queue.name(),
            handler = self.handler.name(),
            max_workers = self.settings.max_workers,
            dead_letter = self.dead_letter.as_ref().map(|q| q.name()).unwrap_or("none"),
            "Queue dispatcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Only fetch as many messages as there are free workers, so none
            // sit invisible in memory while their timeout runs.
            let permit = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let batch = (semaphore.available_permits() as u32 + 1).min(self.settings.max_messages);

            let received = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = self.queue.receive(batch, self.settings.wait_time) => received,
            };

            let messages = match received {
                Ok(messages) => messages,
                Err(e) => {
                    drop(permit);
                    tracing::error!(queue = %self.queue.name(), error = %e, "Failed to receive messages");
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(RECEIVE_ERROR_PAUSE) => {}
                    }
                    continue;
                }
            };

            let mut first_permit = Some(permit);
            for message in messages {
                let permit = match first_permit.take() {
                    Some(permit) => permit,
                    None => match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    dispatcher.process(message).await;
                });
            }
        }

        tracing::info!(queue = %self.queue.name(), "Queue dispatcher draining in-flight messages");
        let _ = semaphore
            .acquire_many(self.settings.max_workers as u32)
            .await;
        tracing::info!(queue = %self.queue.name(), "Queue dispatcher stopped");
    }

    /// Run the handler for one message and settle it on the queue.
    #[tracing::instrument(
        skip(self, message),
        fields(
            queue = %self.queue.name(),
            message_id = %message.message_id,
            receive_count = message.receive_count
        )
    )]
    pub async fn process(&self, message: QueueMessage) -> Disposition {
        if message.receive_count > self.settings.max_receive_count {
            let reason = format!(
                "Exceeded {} deliveries",
                self.settings.max_receive_count
            );
            return self.dead_letter(&message, reason).await;
        }

        let start = Instant::now();
        let result =
            tokio::time::timeout(self.settings.handler_timeout, self.handler.handle(&message.body))
                .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(())) => {
                tracing::debug!(duration_ms = duration_ms, "Message handled");
                self.ack(&message).await;
                Disposition::Acked
            }
            Ok(Err(e)) => {
                let is_unrecoverable = e
                    .downcast_ref::<TaskError>()
                    .map(|te| !te.is_recoverable())
                    .unwrap_or(false);

                tracing::error!(
                    error = %e,
                    duration_ms = duration_ms,
                    unrecoverable = is_unrecoverable,
                    "Message handling failed"
                );

                if is_unrecoverable {
                    self.dead_letter(&message, e.to_string()).await
                } else {
                    self.retry(&message).await
                }
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.settings.handler_timeout.as_secs(),
                    "Message handler timed out"
                );
                self.retry(&message).await
            }
        }
    }

    async fn ack(&self, message: &QueueMessage) {
        // The handlers are idempotent; a redelivery after a lost ack is harmless.
        if let Err(e) = self.queue.ack(message).await {
            tracing::warn!(error = %e, "Failed to acknowledge message");
        }
    }

    async fn retry(&self, message: &QueueMessage) -> Disposition {
        let backoff_secs = compute_retry_backoff_seconds(message.receive_count);
        tracing::info!(backoff_secs = backoff_secs, "Scheduling message redelivery");
        self.hide(message, backoff_secs).await;
        Disposition::Retry { backoff_secs }
    }

    async fn hide(&self, message: &QueueMessage, secs: u64) {
        if let Err(e) = self
            .queue
            .extend_visibility(message, Duration::from_secs(secs))
            .await
        {
            tracing::warn!(error = %e, "Failed to change message visibility");
        }
    }

    async fn dead_letter(&self, message: &QueueMessage, reason: String) -> Disposition {
        let Some(dlq) = &self.dead_letter else {
            tracing::error!(
                reason = %reason,
                "No dead-letter queue configured, leaving message to the queue redrive policy"
            );
            self.hide(message, MAX_RETRY_BACKOFF_SECS).await;
            return Disposition::Retry {
                backoff_secs: MAX_RETRY_BACKOFF_SECS,
            };
        };

        let attributes = [
            (FAILURE_REASON_ATTRIBUTE, reason.clone()),
            (SOURCE_QUEUE_ATTRIBUTE, self.queue.name().to_string()),
            (RECEIVE_COUNT_ATTRIBUTE, message.receive_count.to_string()),
        ];
        if let Err(e) = dlq.send(&message.body, &attributes).await {
            tracing::error!(error = %e, reason = %reason, "Failed to dead-letter message");
            self.hide(message, MAX_RETRY_BACKOFF_SECS).await;
            return Disposition::Retry {
                backoff_secs: MAX_RETRY_BACKOFF_SECS,
            };
        }

        tracing::error!(reason = %reason, dead_letter = %dlq.name(), "Message dead-lettered");
        self.ack(message).await;
        Disposition::DeadLettered { reason }
    }
}
