//! Mosaic Worker
//!
//! Consumes the upload-ready and job-result queues and drives the
//! orchestrator from them, plus the periodic transcode status sweep.

pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod notification;
pub mod publisher;
pub mod queue;
pub mod sweep;
pub mod telemetry;

pub use dispatcher::{Disposition, DispatcherSettings, QueueDispatcher, MAX_RETRY_BACKOFF_SECS};
pub use error::{QueueError, QueueResult};
pub use handlers::{JobResultHandler, MessageHandler, UploadReadyHandler};
pub use notification::{parse_job_result, Completion, JobNotification};
pub use publisher::QueuePublisher;
pub use queue::{MemoryQueue, MessageQueue, QueueMessage, SqsQueue};
pub use sweep::spawn_transcode_sweep;
