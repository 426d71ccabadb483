use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger backend error: {0}")]
    Backend(String),

    /// A stored record could not be decoded.
    #[error("Corrupt ledger record {job_id}: {reason}")]
    Corrupt { job_id: String, reason: String },
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Backend(_))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
