//! Processing Orchestrator.
//!
//! Drives an asset through
//! `RESERVED -> INGESTING -> {COMPLETE | FLAGGED | PENDING_EXTERNAL -> {COMPLETE | FLAGGED | FAILED}}`.
//!
//! Every asset mutation happens inside an [`AssetTx`], which holds the
//! asset's row lock; that lock is the per-asset serialization point between
//! workers. The relational record is always written last, so no partially
//! enriched asset is ever visible.
//!
//! Terminal outcomes of external jobs are recorded on the asset itself
//! (`metadata.external_jobs`) inside the same transaction that merges them,
//! which makes the asset record alone sufficient to decide when both jobs of
//! a video have resolved.
//!
//! Video job submission runs outside the row lock. Within one process it is
//! serialized per asset by a striped submission lock; across processes the
//! adapters' deterministic job ids and the ledger's conditional insert keep a
//! redelivered message from creating a second job.

mod ingest;
mod reconcile;

#[cfg(test)]
mod tests;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::notifier::ProfileNotifier;
use mosaic_analysis::{ImageModerator, ModerationTaxonomy, ObjectDetector, VideoModerator};
use mosaic_core::models::{AssetState, JobKind, JobStatus, MediaAsset};
use mosaic_core::{MediaConfig, OrchestratorConfig};
use mosaic_db::{AssetStore, AssetTx, DbError};
use mosaic_ledger::JobLedger;
use mosaic_processing::{ImageTransformer, Transcoder, VideoProber};
use mosaic_storage::Storage;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

pub use reconcile::SweepReport;

/// Metadata key under which resolved external jobs are recorded.
pub(crate) const EXTERNAL_JOBS_KEY: &str = "external_jobs";

const MAX_SUBMISSION_BACKOFF: Duration = Duration::from_secs(30);

const SUBMISSION_LOCK_STRIPES: usize = 64;

/// Concrete adapters wired in by the composition root.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub assets: Arc<dyn AssetStore>,
    pub ledger: Arc<dyn JobLedger>,
    pub storage: Arc<dyn Storage>,
    pub detector: Arc<dyn ObjectDetector>,
    pub image_moderator: Arc<dyn ImageModerator>,
    pub video_moderator: Arc<dyn VideoModerator>,
    pub transcoder: Arc<dyn Transcoder>,
    pub prober: Arc<dyn VideoProber>,
    pub notifier: Arc<dyn ProfileNotifier>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Completed,
    Flagged,
    /// The upload could not be processed at all (e.g. undecodable image).
    Failed,
    PendingExternal,
    /// Duplicate delivery for an asset that already left ingest.
    AlreadyProcessed(AssetState),
    /// The asset was deleted before ingest started.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The outcome was merged; the other job is still outstanding.
    Merged,
    /// The outcome was merged and the asset reached a terminal state.
    Finalized(AssetState),
    /// The outcome had already been applied.
    Duplicate,
    /// Unknown job or vanished asset; nothing to do.
    Discarded,
}

#[derive(Clone)]
pub struct Orchestrator {
    deps: OrchestratorDeps,
    config: OrchestratorConfig,
    transformer: ImageTransformer,
    taxonomy: ModerationTaxonomy,
    submission_locks: Arc<[Mutex<()>]>,
}

impl Orchestrator {
    pub fn new(
        deps: OrchestratorDeps,
        config: OrchestratorConfig,
        media: &MediaConfig,
        taxonomy: ModerationTaxonomy,
    ) -> Self {
        Self {
            deps,
            config,
            transformer: ImageTransformer::new(media),
            taxonomy,
            submission_locks: (0..SUBMISSION_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn submission_lock(&self, asset_id: Uuid) -> &Mutex<()> {
        let stripe = (asset_id.as_u128() % self.submission_locks.len() as u128) as usize;
        &self.submission_locks[stripe]
    }

    pub fn deps(&self) -> &OrchestratorDeps {
        &self.deps
    }

    fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.config.adapter_timeout_secs)
    }

    /// Bound an adapter call by the configured timeout.
    async fn timed<F, T>(&self, operation: &'static str, fut: F) -> OrchestratorResult<T>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.adapter_timeout(), fut)
            .await
            .map_err(|_| OrchestratorError::Timeout {
                operation,
                seconds: self.config.adapter_timeout_secs,
            })
    }

    async fn lock_asset(&self, asset_id: Uuid) -> OrchestratorResult<Box<dyn AssetTx>> {
        match self.deps.assets.lock(asset_id).await {
            Ok(tx) => Ok(tx),
            Err(DbError::AssetNotFound(id)) => Err(OrchestratorError::AssetNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    fn submission_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = Duration::from_millis(
            self.config
                .submission_base_backoff_ms
                .saturating_mul(1u64 << exponent),
        );
        delay.min(MAX_SUBMISSION_BACKOFF)
    }
}

/// Discard staged writes, logging rather than masking the original error.
pub(crate) async fn rollback_quietly(tx: Box<dyn AssetTx>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "Failed to roll back asset transaction");
    }
}

/// Status of `kind` as recorded on the asset, if that job already resolved.
pub(crate) fn recorded_job_status(asset: &MediaAsset, kind: JobKind) -> Option<JobStatus> {
    asset
        .metadata
        .as_ref()?
        .get(EXTERNAL_JOBS_KEY)?
        .get(kind.as_str())?
        .get("status")?
        .as_str()?
        .parse()
        .ok()
}

pub(crate) fn record_job_status(
    asset: &mut MediaAsset,
    kind: JobKind,
    job_id: &str,
    status: JobStatus,
    reason: Option<&str>,
) {
    let mut jobs = asset
        .metadata
        .as_ref()
        .and_then(|m| m.get(EXTERNAL_JOBS_KEY))
        .and_then(JsonValue::as_object)
        .cloned()
        .unwrap_or_default();
    let mut entry = serde_json::json!({ "job_id": job_id, "status": status.as_str() });
    if let (Some(reason), Some(obj)) = (reason, entry.as_object_mut()) {
        obj.insert("reason".to_string(), JsonValue::String(reason.to_string()));
    }
    jobs.insert(kind.as_str().to_string(), entry);
    asset.merge_metadata(serde_json::json!({ EXTERNAL_JOBS_KEY: jobs }));
}
