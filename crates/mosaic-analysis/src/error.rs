use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Missing or inconsistent adapter configuration. Not retryable until fixed.
    #[error("Analysis adapter misconfigured: {0}")]
    Configuration(String),

    /// The provider call failed or returned an unusable response.
    #[error("Analysis provider error: {0}")]
    Provider(String),

    #[error("Moderation job not found: {0}")]
    JobNotFound(String),
}

impl AnalysisError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AnalysisError::Provider(_))
    }
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
