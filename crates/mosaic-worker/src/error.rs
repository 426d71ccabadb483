use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue provider error: {0}")]
    Provider(String),

    #[error("Message {0} has no receipt handle")]
    MissingReceipt(String),

    #[error("Queue configuration error: {0}")]
    Configuration(String),
}

pub type QueueResult<T> = Result<T, QueueError>;
