//! Queue message handlers.
//!
//! A handler returns `Ok` when the message can be acknowledged. Failures are
//! wrapped in [`TaskError`] so the dispatcher can tell a retry from a
//! dead-letter.

use crate::notification::{parse_job_result, Completion};
use anyhow::Context;
use async_trait::async_trait;
use mosaic_analysis::{AnalysisError, VideoModerationStatus, VideoModerator};
use mosaic_core::models::{JobOutcome, UploadReadyMessage};
use mosaic_core::{TaskError, TaskResultExt};
use mosaic_orchestrator::Orchestrator;
use std::sync::Arc;

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, body: &str) -> anyhow::Result<()>;
}

/// Starts ingest for an "upload ready" message.
pub struct UploadReadyHandler {
    orchestrator: Orchestrator,
}

impl UploadReadyHandler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl MessageHandler for UploadReadyHandler {
    fn name(&self) -> &'static str {
        "upload_ready"
    }

    async fn handle(&self, body: &str) -> anyhow::Result<()> {
        let message: UploadReadyMessage = serde_json::from_str(body)
            .context("Malformed upload-ready message")
            .unrecoverable()?;

        let outcome = self
            .orchestrator
            .begin_ingest(message.asset_id, &message.storage_key, &message.tags)
            .await
            .map_err(TaskError::from)?;

        tracing::debug!(asset_id = %message.asset_id, outcome = ?outcome, "Upload-ready message handled");
        Ok(())
    }
}

/// Reconciles external job completions.
pub struct JobResultHandler {
    orchestrator: Orchestrator,
    video_moderator: Arc<dyn VideoModerator>,
}

impl JobResultHandler {
    pub fn new(orchestrator: Orchestrator, video_moderator: Arc<dyn VideoModerator>) -> Self {
        Self {
            orchestrator,
            video_moderator,
        }
    }

    /// Resolve a moderation completion into labels. `None` means the job
    /// vanished at the provider and the message should be dropped.
    async fn fetch_moderation_outcome(&self, job_id: &str) -> Result<Option<JobOutcome>, TaskError> {
        match self
            .video_moderator
            .fetch_video_moderation_labels(job_id)
            .await
        {
            Ok(VideoModerationStatus::Succeeded(labels)) => {
                Ok(Some(JobOutcome::Succeeded { labels }))
            }
            Ok(VideoModerationStatus::Failed(reason)) => Ok(Some(JobOutcome::Failed { reason })),
            Ok(VideoModerationStatus::InProgress) => Err(TaskError::recoverable(anyhow::anyhow!(
                "Moderation job {} reported complete but results are not ready",
                job_id
            ))),
            Err(AnalysisError::JobNotFound(_)) => Ok(None),
            Err(e) => {
                let retryable = e.is_retryable();
                Err(TaskError::with_policy(e, retryable))
            }
        }
    }
}

#[async_trait]
impl MessageHandler for JobResultHandler {
    fn name(&self) -> &'static str {
        "job_result"
    }

    async fn handle(&self, body: &str) -> anyhow::Result<()> {
        let notification = parse_job_result(body).unrecoverable()?;

        let outcome = match notification.completion {
            Completion::Outcome(outcome) => outcome,
            Completion::ModerationSucceeded => {
                let awaited = self
                    .orchestrator
                    .awaits_outcome(&notification.job_id, notification.job_tag)
                    .await
                    .map_err(TaskError::from)?;
                if !awaited {
                    tracing::debug!(
                        job_id = %notification.job_id,
                        "Moderation result already applied or job unknown, skipping label fetch"
                    );
                    return Ok(());
                }
                match self.fetch_moderation_outcome(&notification.job_id).await? {
                    Some(outcome) => outcome,
                    None => {
                        tracing::warn!(
                            job_id = %notification.job_id,
                            "Moderation job unknown to the provider, dropping result"
                        );
                        return Ok(());
                    }
                }
            }
            Completion::NotTerminal(status) => {
                tracing::debug!(job_id = %notification.job_id, status = %status, "Ignoring non-terminal job status");
                return Ok(());
            }
        };

        let result = self
            .orchestrator
            .reconcile_external_job(&notification.job_id, notification.job_tag, &outcome)
            .await
            .map_err(TaskError::from)?;

        tracing::debug!(
            job_id = %notification.job_id,
            kind = ?notification.kind,
            result = ?result,
            "Job result handled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::models::{AssetState, MediaKind};
    use mosaic_orchestrator::testing::{fixture_png, Harness, ScriptedModerator};
    use serde_json::json;
    use uuid::Uuid;

    fn task_error(err: &anyhow::Error) -> &TaskError {
        err.downcast_ref::<TaskError>().unwrap()
    }

    fn upload_ready(asset: &mosaic_core::models::MediaAsset) -> String {
        serde_json::to_string(&UploadReadyMessage {
            asset_id: asset.id,
            storage_key: asset.storage_key.clone(),
            owner_id: asset.owner_id,
            album_id: asset.album_id,
            tags: vec![],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_upload_ready_ingests_image() {
        let h = Harness::new().await;
        let asset = h
            .upload(MediaKind::Image, "image/png", fixture_png(64, 48), &[])
            .await;
        let handler = UploadReadyHandler::new(h.orchestrator.clone());

        handler.handle(&upload_ready(&asset)).await.unwrap();
        assert_eq!(h.asset(asset.id).await.state, AssetState::Complete);
    }

    #[tokio::test]
    async fn test_malformed_upload_ready_is_unrecoverable() {
        let h = Harness::new().await;
        let handler = UploadReadyHandler::new(h.orchestrator.clone());

        let err = handler.handle("{\"asset_id\": 42}").await.unwrap_err();
        assert!(!task_error(&err).is_recoverable());
    }

    #[tokio::test]
    async fn test_unknown_asset_is_unrecoverable() {
        let h = Harness::new().await;
        let handler = UploadReadyHandler::new(h.orchestrator.clone());
        let body = json!({
            "asset_id": Uuid::new_v4(),
            "storage_key": "media/x/y.png",
            "owner_id": Uuid::new_v4()
        })
        .to_string();

        let err = handler.handle(&body).await.unwrap_err();
        assert!(!task_error(&err).is_recoverable());
    }

    #[tokio::test]
    async fn test_moderation_completion_fetches_labels() {
        let h = Harness::new().await;
        let asset = h
            .upload(MediaKind::Video, "video/mp4", b"not really a video".to_vec(), &[])
            .await;
        UploadReadyHandler::new(h.orchestrator.clone())
            .handle(&upload_ready(&asset))
            .await
            .unwrap();
        assert_eq!(h.asset(asset.id).await.state, AssetState::PendingExternal);

        let job_id = ScriptedModerator::job_id_for(asset.id);
        h.moderator
            .set_video_status(
                &job_id,
                VideoModerationStatus::Succeeded(vec!["Violence".to_string()]),
            )
            .await;
        let handler = JobResultHandler::new(h.orchestrator.clone(), h.moderator.clone());
        let inner = json!({
            "JobId": job_id,
            "Status": "SUCCEEDED",
            "API": "StartContentModeration",
            "JobTag": asset.id.to_string()
        });
        let body = json!({ "Type": "Notification", "Message": inner.to_string() }).to_string();
        handler.handle(&body).await.unwrap();
        assert_eq!(h.moderator.label_fetches(), 1);

        // Redelivery of the same completion is settled from the ledger alone.
        handler.handle(&body).await.unwrap();
        assert_eq!(h.moderator.label_fetches(), 1);

        let transcode = json!({
            "job_id": mosaic_orchestrator::testing::ScriptedTranscoder::job_id_for(asset.id),
            "status": "succeeded"
        })
        .to_string();
        handler.handle(&transcode).await.unwrap();

        assert_eq!(h.asset(asset.id).await.state, AssetState::Flagged);
    }

    async fn ingested_video(h: &Harness) -> String {
        let asset = h
            .upload(MediaKind::Video, "video/mp4", b"not really a video".to_vec(), &[])
            .await;
        UploadReadyHandler::new(h.orchestrator.clone())
            .handle(&upload_ready(&asset))
            .await
            .unwrap();
        ScriptedModerator::job_id_for(asset.id)
    }

    #[tokio::test]
    async fn test_results_not_ready_is_recoverable() {
        let h = Harness::new().await;
        let job_id = ingested_video(&h).await;
        h.moderator
            .set_video_status(&job_id, VideoModerationStatus::InProgress)
            .await;
        let handler = JobResultHandler::new(h.orchestrator.clone(), h.moderator.clone());
        let body = json!({ "JobId": job_id, "Status": "SUCCEEDED" }).to_string();

        let err = handler.handle(&body).await.unwrap_err();
        assert!(task_error(&err).is_recoverable());
    }

    #[tokio::test]
    async fn test_vanished_provider_job_is_dropped() {
        let h = Harness::new().await;
        let job_id = ingested_video(&h).await;
        let handler = JobResultHandler::new(h.orchestrator.clone(), h.moderator.clone());
        let body = json!({ "JobId": job_id, "Status": "SUCCEEDED" }).to_string();

        handler.handle(&body).await.unwrap();
        assert_eq!(h.moderator.label_fetches(), 1);
    }

    #[tokio::test]
    async fn test_unknown_job_skips_provider_lookup() {
        let h = Harness::new().await;
        let handler = JobResultHandler::new(h.orchestrator.clone(), h.moderator.clone());
        let body = json!({ "JobId": "never-submitted", "Status": "SUCCEEDED" }).to_string();

        handler.handle(&body).await.unwrap();
        assert_eq!(h.moderator.label_fetches(), 0);
    }

    #[tokio::test]
    async fn test_progress_report_is_acknowledged() {
        let h = Harness::new().await;
        let handler = JobResultHandler::new(h.orchestrator.clone(), h.moderator.clone());
        let body = json!({ "JobId": "abc", "Status": "IN_PROGRESS" }).to_string();

        handler.handle(&body).await.unwrap();
    }
}
