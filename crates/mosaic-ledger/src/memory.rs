use crate::error::LedgerResult;
use crate::expiry_for;
use crate::traits::JobLedger;
use async_trait::async_trait;
use chrono::Utc;
use mosaic_core::models::{ExternalJobRecord, JobKind, JobStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local ledger for tests and single-node development.
pub struct MemoryJobLedger {
    records: RwLock<HashMap<String, ExternalJobRecord>>,
    ttl_hours: i64,
}

impl MemoryJobLedger {
    pub fn new(ttl_hours: i64) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl_hours,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for MemoryJobLedger {
    fn default() -> Self {
        Self::new(72)
    }
}

#[async_trait]
impl JobLedger for MemoryJobLedger {
    async fn put(&self, record: &ExternalJobRecord) -> LedgerResult<bool> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.job_id) {
            return Ok(false);
        }
        records.insert(record.job_id.clone(), record.clone());
        Ok(true)
    }

    async fn get(&self, job_id: &str) -> LedgerResult<Option<ExternalJobRecord>> {
        Ok(self.records.read().await.get(job_id).cloned())
    }

    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        failure_reason: Option<&str>,
    ) -> LedgerResult<Option<ExternalJobRecord>> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(job_id) else {
            return Ok(None);
        };
        if record.status.is_terminal() {
            return Ok(Some(record.clone()));
        }

        let now = Utc::now();
        record.status = status;
        record.failure_reason = failure_reason.map(str::to_string);
        record.updated_at = now;
        record.expires_at = expiry_for(status, now, self.ttl_hours);
        Ok(Some(record.clone()))
    }

    async fn list_by_asset(&self, asset_id: Uuid) -> LedgerResult<Vec<ExternalJobRecord>> {
        let records = self.records.read().await;
        let mut found: Vec<ExternalJobRecord> = records
            .values()
            .filter(|r| r.asset_id == asset_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn list_pending(&self, kind: JobKind) -> LedgerResult<Vec<ExternalJobRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.kind == kind && !r.status.is_terminal())
            .cloned()
            .collect())
    }
}
