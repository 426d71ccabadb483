use super::{rollback_quietly, IngestOutcome, Orchestrator};
use crate::error::{processing_is_retryable, OrchestratorError, OrchestratorResult};
use crate::notifier::ProfilePictureUpdated;
use chrono::Utc;
use mosaic_analysis::ModerationVerdict;
use mosaic_core::models::{
    AssetState, ExternalJobRecord, JobKind, MediaAsset, MediaKind, ModerationFlag, Rendition,
};
use mosaic_core::{merge_tags, normalize_tags};
use mosaic_processing::{
    EncodedImage, ImageMetadata, ImageTransformer, ProcessingResult, RenditionOutput,
};
use mosaic_storage::keys::derived_key;
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Instant;
use uuid::Uuid;

enum Admission {
    Proceed(MediaAsset),
    Skip(IngestOutcome),
}

/// CPU-bound outputs of the image path, produced on a blocking thread.
struct ImageDerivatives {
    thumbnail: EncodedImage,
    optimized: EncodedImage,
    renditions: Vec<RenditionOutput>,
    metadata: Option<ImageMetadata>,
}

/// Derived artifacts after upload.
struct StoredDerivatives {
    thumbnail_url: String,
    optimized_url: String,
    renditions: Vec<Rendition>,
    metadata: Option<ImageMetadata>,
}

/// Decode once and produce every derived artifact.
///
/// Decoding, thumbnailing and optimization must succeed. Renditions and
/// metadata are enrichment and degrade to empty.
fn derive_image(transformer: &ImageTransformer, data: &[u8]) -> ProcessingResult<ImageDerivatives> {
    let decoded = transformer.decode(data)?;
    let thumbnail = transformer.thumbnail(&decoded)?;
    let optimized = transformer.optimize(&decoded)?;

    let renditions = transformer.renditions(&decoded).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Rendition generation failed, continuing without renditions");
        Vec::new()
    });
    let metadata = match transformer.extract_metadata(data) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            tracing::warn!(error = %e, "Metadata extraction failed");
            None
        }
    };

    Ok(ImageDerivatives {
        thumbnail,
        optimized,
        renditions,
        metadata,
    })
}

impl Orchestrator {
    /// Start (or resume) ingest of an uploaded object.
    ///
    /// Safe to call repeatedly for the same asset: once the asset has left
    /// INGESTING the call is a no-op. Errors leave the asset in INGESTING
    /// with nothing else persisted.
    #[tracing::instrument(skip(self, storage_key, caller_tags), fields(asset_id = %asset_id))]
    pub async fn begin_ingest(
        &self,
        asset_id: Uuid,
        storage_key: &str,
        caller_tags: &[String],
    ) -> OrchestratorResult<IngestOutcome> {
        let start = Instant::now();

        let asset = match self.admit(asset_id, storage_key, caller_tags).await? {
            Admission::Proceed(asset) => asset,
            Admission::Skip(outcome) => {
                tracing::info!(outcome = ?outcome, "Ingest skipped");
                return Ok(outcome);
            }
        };

        let kind = asset.kind;
        let result = if kind.is_image() {
            self.ingest_image(asset).await
        } else {
            self.ingest_video(asset).await
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => tracing::info!(
                kind = %kind,
                outcome = ?outcome,
                duration_ms = duration_ms,
                "Ingest finished"
            ),
            Err(e) => tracing::error!(
                kind = %kind,
                error = %e,
                recoverable = e.is_recoverable(),
                duration_ms = duration_ms,
                "Ingest aborted, asset left in ingesting"
            ),
        }
        result
    }

    /// Validate the request against the record and commit INGESTING.
    async fn admit(
        &self,
        asset_id: Uuid,
        storage_key: &str,
        caller_tags: &[String],
    ) -> OrchestratorResult<Admission> {
        let mut tx = self.lock_asset(asset_id).await?;
        let current = tx.asset().clone();

        if current.is_deleted() {
            rollback_quietly(tx).await;
            return Ok(Admission::Skip(IngestOutcome::Discarded));
        }
        if current.storage_key != storage_key {
            rollback_quietly(tx).await;
            return Err(OrchestratorError::StorageKeyMismatch {
                asset_id,
                expected: current.storage_key,
                actual: storage_key.to_string(),
            });
        }
        if !current.state.accepts_ingest() {
            rollback_quietly(tx).await;
            return Ok(Admission::Skip(IngestOutcome::AlreadyProcessed(
                current.state,
            )));
        }

        let mut updated = current.clone();
        updated.state = AssetState::Ingesting;
        updated.caller_tags = merge_tags(&current.caller_tags, caller_tags);
        updated.tags = merge_tags(&current.tags, &updated.caller_tags);

        if updated == current {
            rollback_quietly(tx).await;
            tracing::info!("Resuming ingest");
            return Ok(Admission::Proceed(current));
        }

        tx.save(updated).await?;
        let admitted = tx.asset().clone();
        tx.commit().await?;
        Ok(Admission::Proceed(admitted))
    }

    async fn ingest_image(&self, asset: MediaAsset) -> OrchestratorResult<IngestOutcome> {
        let verdict = self
            .timed(
                "image moderation",
                self.deps.image_moderator.moderate_image(&asset.storage_key),
            )
            .await?
            .map_err(OrchestratorError::Moderation)?;

        if verdict.flagged {
            tracing::warn!(labels = ?verdict.label_names(), "Image flagged by moderation");
            return self.commit_flagged_image(asset.id, &verdict).await;
        }

        let detected = match self
            .timed(
                "object detection",
                self.deps.detector.detect_objects(&asset.storage_key),
            )
            .await
        {
            Ok(tags) => tags,
            Err(e) => {
                tracing::warn!(error = %e, "Object detection unavailable, continuing without detected tags");
                BTreeSet::new()
            }
        };

        let original = self
            .timed(
                "download original",
                self.deps.storage.download(&asset.storage_key),
            )
            .await??;

        let transformer = self.transformer.clone();
        let derived = tokio::task::spawn_blocking(move || derive_image(&transformer, &original))
            .await
            .map_err(|e| OrchestratorError::Join(e.to_string()))?;

        let derived = match derived {
            Ok(derived) => derived,
            Err(e) if processing_is_retryable(&e) => return Err(e.into()),
            Err(e) => return self.fail_asset(asset.id, &e.to_string()).await,
        };

        let stored = self.store_derivatives(asset.id, derived).await?;
        self.commit_clean_image(asset.id, &detected, stored, &verdict)
            .await
    }

    async fn store_derivatives(
        &self,
        asset_id: Uuid,
        derived: ImageDerivatives,
    ) -> OrchestratorResult<StoredDerivatives> {
        let (_, thumbnail_url) = self
            .upload_artifact(asset_id, "thumbnail", derived.thumbnail)
            .await?;
        let (_, optimized_url) = self
            .upload_artifact(asset_id, "optimized", derived.optimized)
            .await?;

        let mut renditions = Vec::with_capacity(derived.renditions.len());
        for rendition in derived.renditions {
            let name = format!("w{}", rendition.ladder_width);
            let (width, height) = (rendition.image.width, rendition.image.height);
            let (storage_key, url) = self.upload_artifact(asset_id, &name, rendition.image).await?;
            renditions.push(Rendition {
                width,
                height,
                storage_key,
                url,
            });
        }

        Ok(StoredDerivatives {
            thumbnail_url,
            optimized_url,
            renditions,
            metadata: derived.metadata,
        })
    }

    /// Derived keys are deterministic, so a retried ingest overwrites rather
    /// than duplicates.
    async fn upload_artifact(
        &self,
        asset_id: Uuid,
        name: &str,
        image: EncodedImage,
    ) -> OrchestratorResult<(String, String)> {
        let key = derived_key(asset_id, &format!("{}.{}", name, image.extension));
        let url = self
            .timed(
                "upload derived artifact",
                self.deps
                    .storage
                    .upload_with_key(&key, image.data, image.content_type),
            )
            .await??;
        Ok((key, url))
    }

    async fn commit_flagged_image(
        &self,
        asset_id: Uuid,
        verdict: &ModerationVerdict,
    ) -> OrchestratorResult<IngestOutcome> {
        let mut tx = self.lock_asset(asset_id).await?;
        if tx.asset().state != AssetState::Ingesting {
            let state = tx.asset().state;
            rollback_quietly(tx).await;
            return Ok(IngestOutcome::AlreadyProcessed(state));
        }

        let mut updated = tx.asset().clone();
        updated.state = AssetState::Flagged;
        updated.moderation = ModerationFlag::Flagged;
        updated.moderation_labels = verdict.label_names();
        updated.tags = updated.caller_tags.clone();
        updated.thumbnail_url = None;

        tx.save(updated).await?;
        tx.commit().await?;
        Ok(IngestOutcome::Flagged)
    }

    async fn commit_clean_image(
        &self,
        asset_id: Uuid,
        detected: &BTreeSet<String>,
        stored: StoredDerivatives,
        verdict: &ModerationVerdict,
    ) -> OrchestratorResult<IngestOutcome> {
        let mut tx = self.lock_asset(asset_id).await?;
        if tx.asset().state != AssetState::Ingesting {
            let state = tx.asset().state;
            rollback_quietly(tx).await;
            return Ok(IngestOutcome::AlreadyProcessed(state));
        }

        let mut updated = tx.asset().clone();
        let detected = normalize_tags(detected);
        updated.tags = merge_tags(&updated.caller_tags, &detected);
        updated.merge_metadata(json!({
            "original_url": updated.public_url,
            "optimized_url": stored.optimized_url,
            "renditions": stored.renditions,
        }));
        if let Some(metadata) = &stored.metadata {
            updated.merge_metadata(json!({
                "width": metadata.width,
                "height": metadata.height,
                "format": metadata.format,
                "color_type": metadata.color_type,
                "size_bytes": metadata.size_bytes,
            }));
            if let Some(camera) = &metadata.camera {
                updated.merge_metadata(json!({ "camera": camera }));
            }
        }
        updated.public_url = stored.optimized_url;
        updated.thumbnail_url = Some(stored.thumbnail_url);
        updated.moderation = ModerationFlag::Clean;
        updated.moderation_labels = verdict.label_names();
        updated.state = AssetState::Complete;

        tx.save(updated).await?;

        if tx.asset().kind == MediaKind::ProfileImage {
            let event = ProfilePictureUpdated {
                user_id: tx.asset().owner_id,
                asset_id,
                url: tx.asset().best_derived_url().to_string(),
                updated_at: Utc::now(),
            };
            let delivered = self
                .timed(
                    "profile notification",
                    self.deps.notifier.profile_picture_updated(&event),
                )
                .await
                .and_then(|r| r.map_err(OrchestratorError::from));
            if let Err(e) = delivered {
                rollback_quietly(tx).await;
                return Err(e);
            }
        }

        tx.commit().await?;
        Ok(IngestOutcome::Completed)
    }

    /// Terminal failure for uploads that can never be processed.
    async fn fail_asset(&self, asset_id: Uuid, reason: &str) -> OrchestratorResult<IngestOutcome> {
        tracing::error!(reason = %reason, "Upload cannot be processed, marking asset failed");

        let mut tx = self.lock_asset(asset_id).await?;
        if tx.asset().state != AssetState::Ingesting {
            let state = tx.asset().state;
            rollback_quietly(tx).await;
            return Ok(IngestOutcome::AlreadyProcessed(state));
        }

        let mut updated = tx.asset().clone();
        updated.state = AssetState::Failed;
        updated.merge_metadata(json!({ "error": reason }));
        tx.save(updated).await?;
        tx.commit().await?;
        Ok(IngestOutcome::Failed)
    }

    /// Submit both external jobs, record them in the ledger, then move the
    /// asset to PENDING_EXTERNAL.
    ///
    /// Jobs already in the ledger for this asset are not resubmitted; a
    /// resubmission that races a lost ledger write returns the same provider
    /// job id.
    async fn ingest_video(&self, asset: MediaAsset) -> OrchestratorResult<IngestOutcome> {
        let _submitting = self.submission_lock(asset.id).lock().await;

        let existing = self
            .timed("ledger lookup", self.deps.ledger.list_by_asset(asset.id))
            .await??;

        for kind in [JobKind::VideoModeration, JobKind::VideoTranscode] {
            if let Some(record) = existing.iter().find(|r| r.kind == kind) {
                tracing::debug!(kind = %kind, job_id = %record.job_id, "Job already submitted");
                continue;
            }

            let job_id = self.submit_with_retry(kind, &asset).await?;
            let record =
                ExternalJobRecord::pending(job_id.clone(), asset.id, kind, asset.storage_key.clone());
            let inserted = self
                .timed("ledger write", self.deps.ledger.put(&record))
                .await??;
            tracing::info!(
                kind = %kind,
                job_id = %job_id,
                inserted = inserted,
                "External job recorded"
            );
        }

        let mut tx = self.lock_asset(asset.id).await?;
        if tx.asset().state != AssetState::Ingesting {
            let state = tx.asset().state;
            rollback_quietly(tx).await;
            return Ok(IngestOutcome::AlreadyProcessed(state));
        }

        let mut updated = tx.asset().clone();
        updated.state = AssetState::PendingExternal;
        // Both results may have been merged while we were still submitting.
        let finalized = Self::finalize_if_resolved(&mut updated);
        tx.save(updated).await?;
        tx.commit().await?;

        Ok(match finalized {
            Some(AssetState::Complete) => IngestOutcome::Completed,
            Some(AssetState::Flagged) => IngestOutcome::Flagged,
            Some(_) => IngestOutcome::Failed,
            None => IngestOutcome::PendingExternal,
        })
    }

    async fn submit_with_retry(&self, kind: JobKind, asset: &MediaAsset) -> OrchestratorResult<String> {
        let max_attempts = self.config.submission_max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.submit_once(kind, asset).await {
                Ok(job_id) => return Ok(job_id),
                Err(e) if e.is_recoverable() && attempt < max_attempts => {
                    let backoff = self.submission_backoff(attempt);
                    tracing::warn!(
                        kind = %kind,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Job submission failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn submit_once(&self, kind: JobKind, asset: &MediaAsset) -> OrchestratorResult<String> {
        match kind {
            JobKind::VideoModeration => self
                .timed(
                    "video moderation submission",
                    self.deps
                        .video_moderator
                        .submit_video_moderation(asset.id, &asset.storage_key),
                )
                .await?
                .map_err(|e| OrchestratorError::Submission {
                    kind,
                    retryable: e.is_retryable(),
                    message: e.to_string(),
                }),
            JobKind::VideoTranscode => self
                .timed(
                    "transcode submission",
                    self.deps.transcoder.submit(asset.id, &asset.storage_key),
                )
                .await?
                .map_err(|e| OrchestratorError::Submission {
                    kind,
                    retryable: processing_is_retryable(&e),
                    message: e.to_string(),
                }),
        }
    }
}
