use crate::notifier::NotifyError;
use mosaic_analysis::AnalysisError;
use mosaic_core::models::JobKind;
use mosaic_core::TaskError;
use mosaic_db::DbError;
use mosaic_ledger::LedgerError;
use mosaic_processing::ProcessingError;
use mosaic_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Asset {0} not found")]
    AssetNotFound(Uuid),

    #[error("Storage key mismatch for asset {asset_id}: expected {expected}, got {actual}")]
    StorageKeyMismatch {
        asset_id: Uuid,
        expected: String,
        actual: String,
    },

    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    /// Moderation could not produce a verdict; never treated as clean.
    #[error("Image moderation failed: {0}")]
    Moderation(#[source] AnalysisError),

    #[error("Failed to submit {kind} job: {message}")]
    Submission {
        kind: JobKind,
        message: String,
        retryable: bool,
    },

    #[error("Job {job_id} for asset {asset_id} is not yet visible in the ledger")]
    NotYetVisible { job_id: String, asset_id: Uuid },

    #[error("Profile notification failed: {0}")]
    Notification(#[from] NotifyError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Blocking task failed: {0}")]
    Join(String),
}

impl OrchestratorError {
    /// Whether redelivering the triggering message can succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            OrchestratorError::AssetNotFound(_) | OrchestratorError::StorageKeyMismatch { .. } => {
                false
            }
            OrchestratorError::Timeout { .. }
            | OrchestratorError::NotYetVisible { .. }
            | OrchestratorError::Notification(_)
            | OrchestratorError::Join(_) => true,
            OrchestratorError::Moderation(e) => e.is_retryable(),
            OrchestratorError::Submission { retryable, .. } => *retryable,
            OrchestratorError::Storage(e) => !e.is_permanent(),
            OrchestratorError::Processing(e) => processing_is_retryable(e),
            OrchestratorError::Ledger(e) => e.is_retryable(),
            OrchestratorError::Db(e) => e.is_retryable(),
        }
    }
}

pub(crate) fn processing_is_retryable(err: &ProcessingError) -> bool {
    match err {
        ProcessingError::Storage(e) => !e.is_permanent(),
        ProcessingError::Io(_) => true,
        _ => false,
    }
}

impl From<OrchestratorError> for TaskError {
    fn from(err: OrchestratorError) -> Self {
        let recoverable = err.is_recoverable();
        TaskError::with_policy(err, recoverable)
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability_policy() {
        assert!(OrchestratorError::Timeout {
            operation: "image moderation",
            seconds: 30
        }
        .is_recoverable());
        assert!(!OrchestratorError::Moderation(AnalysisError::Configuration(
            "missing".to_string()
        ))
        .is_recoverable());
        assert!(OrchestratorError::Moderation(AnalysisError::Provider("503".to_string()))
            .is_recoverable());
        assert!(!OrchestratorError::StorageKeyMismatch {
            asset_id: Uuid::new_v4(),
            expected: "a".to_string(),
            actual: "b".to_string(),
        }
        .is_recoverable());
        assert!(!OrchestratorError::Submission {
            kind: JobKind::VideoModeration,
            message: "no channel".to_string(),
            retryable: false,
        }
        .is_recoverable());
    }

    #[test]
    fn test_task_error_carries_policy() {
        let task: TaskError = OrchestratorError::NotYetVisible {
            job_id: "j".to_string(),
            asset_id: Uuid::new_v4(),
        }
        .into();
        assert!(task.is_recoverable());
        assert!(task.inner().downcast_ref::<OrchestratorError>().is_some());
    }
}
