use crate::error::LedgerResult;
use async_trait::async_trait;
use mosaic_core::models::{ExternalJobRecord, JobKind, JobStatus};
use uuid::Uuid;

#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Insert `record` unless a record with the same job id exists.
    ///
    /// Returns `false` when the job was already recorded; the existing record
    /// is left untouched.
    async fn put(&self, record: &ExternalJobRecord) -> LedgerResult<bool>;

    async fn get(&self, job_id: &str) -> LedgerResult<Option<ExternalJobRecord>>;

    /// Move a job to `status`.
    ///
    /// Terminal states are sticky: once a record is terminal, later updates
    /// leave it unchanged and the stored record is returned as is. Returns
    /// `None` if the job is unknown.
    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        failure_reason: Option<&str>,
    ) -> LedgerResult<Option<ExternalJobRecord>>;

    async fn list_by_asset(&self, asset_id: Uuid) -> LedgerResult<Vec<ExternalJobRecord>>;

    /// Jobs of `kind` that are still pending or in progress.
    async fn list_pending(&self, kind: JobKind) -> LedgerResult<Vec<ExternalJobRecord>>;
}
