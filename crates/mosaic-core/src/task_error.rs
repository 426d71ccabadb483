//! Message handling error types
//!
//! Handlers invoked by the queue dispatcher return these to say whether a
//! failed message should be redelivered later or diverted to the dead-letter
//! queue straight away.

use std::fmt;

/// Handler error tagged with its redelivery policy
#[derive(Debug)]
pub struct TaskError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl TaskError {
    /// A failure that will not go away on redelivery.
    ///
    /// The dispatcher dead-letters the message immediately. Use for
    /// malformed payloads, missing configuration, and precondition
    /// violations such as a storage key that does not match the asset.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// A transient failure; the message becomes visible again after a backoff.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    /// Build from an error whose retryability is already known.
    pub fn with_policy(err: impl Into<anyhow::Error>, recoverable: bool) -> Self {
        Self {
            inner: err.into(),
            recoverable,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for TaskError {
    /// Untagged errors are retried.
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

/// Extension trait for marking a result as not worth redelivering
pub trait TaskResultExt<T> {
    fn unrecoverable(self) -> Result<T, TaskError>;
}

impl<T, E: Into<anyhow::Error>> TaskResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, TaskError> {
        self.map_err(|e| TaskError::unrecoverable(e.into()))
    }
}
