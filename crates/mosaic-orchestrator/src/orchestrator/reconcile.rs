use super::{record_job_status, recorded_job_status, rollback_quietly, Orchestrator, ReconcileOutcome};
use crate::error::{OrchestratorError, OrchestratorResult};
use mosaic_core::models::{
    AssetState, ExternalJobRecord, JobKind, JobOutcome, JobStatus, MediaAsset, ModerationFlag,
};
use mosaic_processing::{ProcessingError, VideoMetadata};
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

/// Counts from one pass of the transcode poll sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub reconciled: usize,
    pub still_running: usize,
    pub errors: usize,
}

/// Changes a terminal outcome makes to the asset, computed before the row
/// lock is taken so the lock is never held across a probe.
enum OutcomePatch {
    Moderation { labels: Vec<String>, flagged: bool },
    Transcode {
        manifest_url: String,
        video: Option<VideoMetadata>,
    },
    Failed { reason: String },
}

impl OutcomePatch {
    fn apply(self, asset: &mut MediaAsset) {
        match self {
            OutcomePatch::Moderation { labels, flagged } => {
                asset.moderation = if flagged {
                    ModerationFlag::Flagged
                } else {
                    ModerationFlag::Clean
                };
                asset.moderation_labels = labels;
            }
            OutcomePatch::Transcode {
                manifest_url,
                video,
            } => {
                asset.manifest_url = Some(manifest_url);
                if let Some(video) = video {
                    asset.merge_metadata(json!({
                        "duration": video.duration,
                        "width": video.width,
                        "height": video.height,
                        "codec": video.codec,
                        "bitrate": video.bitrate,
                        "framerate": video.framerate,
                        "rotation": video.rotation,
                        "aspect_ratio": video.aspect_ratio,
                    }));
                }
            }
            OutcomePatch::Failed { .. } => {}
        }
    }
}

fn failure_reason(outcome: &JobOutcome) -> Option<&str> {
    match outcome {
        JobOutcome::Failed { reason } => Some(reason.as_str()),
        JobOutcome::Succeeded { .. } => None,
    }
}

impl Orchestrator {
    /// Merge the terminal outcome of an external job into its asset.
    ///
    /// Idempotent: the first terminal outcome recorded for a job wins and
    /// replays change nothing. Unknown jobs are discarded, unless the job tag
    /// names an asset whose submission is still in flight, in which case a
    /// recoverable error asks for redelivery.
    #[tracing::instrument(
        skip(self, job_id, job_tag, outcome),
        fields(job_id = %job_id, status = %outcome.status())
    )]
    pub async fn reconcile_external_job(
        &self,
        job_id: &str,
        job_tag: Option<Uuid>,
        outcome: &JobOutcome,
    ) -> OrchestratorResult<ReconcileOutcome> {
        let record = match self
            .timed("ledger lookup", self.deps.ledger.get(job_id))
            .await??
        {
            Some(record) => record,
            None => return self.handle_unknown_job(job_id, job_tag).await,
        };

        let snapshot = self
            .deps
            .assets
            .get(record.asset_id)
            .await?
            .filter(|asset| !asset.is_deleted());
        let Some(snapshot) = snapshot else {
            tracing::info!(asset_id = %record.asset_id, "Asset no longer exists, discarding job result");
            self.update_ledger(&record, outcome).await?;
            return Ok(ReconcileOutcome::Discarded);
        };
        if recorded_job_status(&snapshot, record.kind).is_some() {
            tracing::debug!(asset_id = %record.asset_id, "Job outcome already applied");
            self.update_ledger(&record, outcome).await?;
            return Ok(ReconcileOutcome::Duplicate);
        }

        let patch = self.outcome_patch(&record, outcome).await;

        let mut tx = self.lock_asset(record.asset_id).await?;
        let current = tx.asset().clone();
        let mergeable = !current.is_deleted()
            && matches!(
                current.state,
                AssetState::Ingesting | AssetState::PendingExternal
            );
        if !mergeable || recorded_job_status(&current, record.kind).is_some() {
            rollback_quietly(tx).await;
            self.update_ledger(&record, outcome).await?;
            return Ok(if mergeable {
                ReconcileOutcome::Duplicate
            } else {
                tracing::info!(state = %current.state, "Asset not awaiting job results, discarding");
                ReconcileOutcome::Discarded
            });
        }

        let mut updated = current;
        patch.apply(&mut updated);
        record_job_status(
            &mut updated,
            record.kind,
            &record.job_id,
            outcome.status(),
            failure_reason(outcome),
        );
        let finalized = if updated.state == AssetState::PendingExternal {
            Self::finalize_if_resolved(&mut updated)
        } else {
            None
        };

        tx.save(updated).await?;
        tx.commit().await?;

        // After the asset commit: a failure here leaves the job outstanding in
        // the ledger, so the sweep or a redelivery replays this call.
        self.update_ledger(&record, outcome).await?;

        Ok(match finalized {
            Some(state) => {
                tracing::info!(
                    asset_id = %record.asset_id,
                    state = %state,
                    "Asset finalized after external jobs resolved"
                );
                ReconcileOutcome::Finalized(state)
            }
            None => ReconcileOutcome::Merged,
        })
    }

    /// Whether a completion for `job_id` can still change anything, so callers
    /// can skip fetching results from the provider. Unknown jobs follow the
    /// rules of [`Self::reconcile_external_job`]: they are discarded, or fail
    /// recoverably while the tagged asset is still submitting.
    pub async fn awaits_outcome(&self, job_id: &str, job_tag: Option<Uuid>) -> OrchestratorResult<bool> {
        match self
            .timed("ledger lookup", self.deps.ledger.get(job_id))
            .await??
        {
            Some(record) => Ok(!record.status.is_terminal()),
            None => self.handle_unknown_job(job_id, job_tag).await.map(|_| false),
        }
    }

    async fn handle_unknown_job(
        &self,
        job_id: &str,
        job_tag: Option<Uuid>,
    ) -> OrchestratorResult<ReconcileOutcome> {
        if let Some(asset_id) = job_tag {
            let asset = self.deps.assets.get(asset_id).await?;
            if asset.is_some_and(|a| a.state == AssetState::Ingesting && !a.is_deleted()) {
                tracing::warn!(
                    asset_id = %asset_id,
                    "Job result arrived before its ledger record, asking for redelivery"
                );
                return Err(OrchestratorError::NotYetVisible {
                    job_id: job_id.to_string(),
                    asset_id,
                });
            }
        }

        tracing::info!("Discarding result for unknown job");
        Ok(ReconcileOutcome::Discarded)
    }

    async fn outcome_patch(&self, record: &ExternalJobRecord, outcome: &JobOutcome) -> OutcomePatch {
        match (outcome, record.kind) {
            (JobOutcome::Failed { reason }, _) => OutcomePatch::Failed {
                reason: reason.clone(),
            },
            (JobOutcome::Succeeded { labels }, JobKind::VideoModeration) => {
                let labels: Vec<String> = labels
                    .iter()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let flagged = self.taxonomy.is_flagged_names(&labels);
                OutcomePatch::Moderation { labels, flagged }
            }
            (JobOutcome::Succeeded { .. }, JobKind::VideoTranscode) => {
                let manifest_key = self.deps.transcoder.manifest_key(record.asset_id);
                OutcomePatch::Transcode {
                    manifest_url: self.deps.storage.public_url(&manifest_key),
                    video: self.probe_source(&record.source_key).await,
                }
            }
        }
    }

    /// Best-effort metadata probe of the uploaded source.
    async fn probe_source(&self, source_key: &str) -> Option<VideoMetadata> {
        let url = match self
            .timed(
                "presign probe source",
                self.deps
                    .storage
                    .get_presigned_url(source_key, Duration::from_secs(15 * 60)),
            )
            .await
            .and_then(|r| r.map_err(OrchestratorError::from))
        {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot presign source for probing");
                return None;
            }
        };

        match self
            .timed("video probe", self.deps.prober.probe(&url))
            .await
            .and_then(|r| r.map_err(OrchestratorError::from))
        {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::warn!(error = %e, "Video metadata probe failed, continuing without it");
                None
            }
        }
    }

    async fn update_ledger(
        &self,
        record: &ExternalJobRecord,
        outcome: &JobOutcome,
    ) -> OrchestratorResult<()> {
        self.timed(
            "ledger update",
            self.deps.ledger.update_status(
                &record.job_id,
                outcome.status(),
                failure_reason(outcome),
            ),
        )
        .await??;
        Ok(())
    }

    /// Move a PENDING_EXTERNAL asset to its terminal state once both jobs
    /// are recorded. Flagged wins over failed, failed over complete.
    pub(crate) fn finalize_if_resolved(asset: &mut MediaAsset) -> Option<AssetState> {
        let moderation = recorded_job_status(asset, JobKind::VideoModeration)?;
        let transcode = recorded_job_status(asset, JobKind::VideoTranscode)?;

        let state = if asset.moderation == ModerationFlag::Flagged {
            AssetState::Flagged
        } else if moderation == JobStatus::Failed || transcode == JobStatus::Failed {
            AssetState::Failed
        } else {
            AssetState::Complete
        };
        asset.state = state;
        Some(state)
    }

    /// Poll every outstanding transcode job and reconcile those that finished.
    ///
    /// Runs alongside push-based reconciliation; both paths go through the
    /// same idempotent merge.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_transcode_jobs(&self) -> OrchestratorResult<SweepReport> {
        let pending = self
            .timed(
                "ledger scan",
                self.deps.ledger.list_pending(JobKind::VideoTranscode),
            )
            .await??;

        let mut report = SweepReport {
            scanned: pending.len(),
            ..SweepReport::default()
        };

        for record in pending {
            let polled = self
                .timed(
                    "transcode poll",
                    self.deps.transcoder.poll_status(&record.job_id),
                )
                .await;

            let outcome = match polled {
                Ok(Ok(state)) if state.status.is_terminal() => match state.status {
                    JobStatus::Succeeded => JobOutcome::Succeeded { labels: Vec::new() },
                    _ => JobOutcome::Failed {
                        reason: state
                            .failure_reason
                            .unwrap_or_else(|| "transcode failed".to_string()),
                    },
                },
                Ok(Ok(state)) => {
                    report.still_running += 1;
                    if state.status != record.status {
                        if let Err(e) = self
                            .deps
                            .ledger
                            .update_status(&record.job_id, state.status, None)
                            .await
                        {
                            tracing::warn!(job_id = %record.job_id, error = %e, "Failed to record transcode progress");
                        }
                    }
                    continue;
                }
                Ok(Err(ProcessingError::JobNotFound(_))) => JobOutcome::Failed {
                    reason: "transcode job disappeared".to_string(),
                },
                Ok(Err(e)) => {
                    tracing::warn!(job_id = %record.job_id, error = %e, "Transcode poll failed");
                    report.errors += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(job_id = %record.job_id, error = %e, "Transcode poll failed");
                    report.errors += 1;
                    continue;
                }
            };

            match self
                .reconcile_external_job(&record.job_id, Some(record.asset_id), &outcome)
                .await
            {
                Ok(_) => report.reconciled += 1,
                Err(e) => {
                    tracing::warn!(job_id = %record.job_id, error = %e, "Transcode reconcile failed");
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            reconciled = report.reconciled,
            still_running = report.still_running,
            errors = report.errors,
            "Transcode sweep finished"
        );
        Ok(report)
    }
}
