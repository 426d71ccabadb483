use super::*;
use crate::testing::{fixture_png, Harness, ScriptedModerator, ScriptedTranscoder};
use mosaic_core::models::{ExternalJobRecord, JobOutcome, MediaKind, ModerationFlag};
use mosaic_db::{AssetStore, AssetTx};
use mosaic_storage::keys::derived_key;
use std::time::Duration;

async fn mutate(h: &Harness, id: Uuid, f: impl FnOnce(&mut MediaAsset)) {
    let mut tx = h.assets.lock(id).await.unwrap();
    let mut asset = tx.asset().clone();
    f(&mut asset);
    tx.save(asset).await.unwrap();
    tx.commit().await.unwrap();
}

async fn ingest(h: &Harness, asset: &MediaAsset, tags: &[&str]) -> OrchestratorResult<IngestOutcome> {
    let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    h.orchestrator
        .begin_ingest(asset.id, &asset.storage_key, &tags)
        .await
}

fn succeeded(labels: &[&str]) -> JobOutcome {
    JobOutcome::Succeeded {
        labels: labels.iter().map(|l| l.to_string()).collect(),
    }
}

fn failed(reason: &str) -> JobOutcome {
    JobOutcome::Failed {
        reason: reason.to_string(),
    }
}

async fn upload_video(h: &Harness) -> MediaAsset {
    h.upload(MediaKind::Video, "video/mp4", b"not really mp4".to_vec(), &[])
        .await
}

#[tokio::test]
async fn test_clean_image_is_fully_enriched() {
    let h = Harness::with_detected(&["Dog", "park"]).await;
    let asset = h
        .upload(MediaKind::Image, "image/png", fixture_png(400, 300), &["vacation"])
        .await;

    let outcome = ingest(&h, &asset, &["Dog"]).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Completed);

    let stored = h.asset(asset.id).await;
    assert_eq!(stored.state, AssetState::Complete);
    assert_eq!(stored.moderation, ModerationFlag::Clean);
    assert_eq!(stored.tags, vec!["dog", "park", "vacation"]);
    assert_eq!(stored.caller_tags, vec!["dog", "vacation"]);

    let thumbnail = stored.thumbnail_url.clone().unwrap();
    assert_eq!(
        thumbnail,
        h.storage.public_url(&derived_key(asset.id, "thumbnail.jpg"))
    );
    assert_eq!(
        stored.public_url,
        h.storage.public_url(&derived_key(asset.id, "optimized.jpg"))
    );

    let metadata = stored.metadata.clone().unwrap();
    assert_eq!(metadata["original_url"], asset.public_url.as_str());
    assert_eq!(metadata["width"], 400);
    assert_eq!(metadata["height"], 300);

    let renditions = stored.renditions();
    let keys: Vec<String> = renditions.iter().map(|r| r.storage_key.clone()).collect();
    let expected: Vec<String> = [320, 640, 1024, 1920]
        .iter()
        .map(|w| derived_key(asset.id, &format!("w{}.jpg", w)))
        .collect();
    assert_eq!(keys, expected);
    // No upscaling past the source width.
    assert_eq!(renditions[0].width, 320);
    assert!(renditions[1..].iter().all(|r| r.width == 400));
    for key in &keys {
        assert!(h.storage.exists(key).await.unwrap());
    }
}

#[tokio::test]
async fn test_flagged_image_keeps_only_caller_tags() {
    let h = Harness::with_detected(&["weapon"]).await;
    h.moderator.flag_with(&["Violence"]).await;
    let asset = h
        .upload(MediaKind::Image, "image/png", fixture_png(64, 64), &["Concert"])
        .await;

    let outcome = ingest(&h, &asset, &[]).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Flagged);

    let stored = h.asset(asset.id).await;
    assert_eq!(stored.state, AssetState::Flagged);
    assert_eq!(stored.moderation, ModerationFlag::Flagged);
    assert_eq!(stored.moderation_labels, vec!["Violence"]);
    assert_eq!(stored.tags, vec!["concert"]);
    assert!(stored.thumbnail_url.is_none());
    assert!(stored.renditions().is_empty());
    assert!(!h
        .storage
        .exists(&derived_key(asset.id, "thumbnail.jpg"))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_moderation_timeout_persists_nothing() {
    let h = Harness::new().await;
    h.moderator.delay_images(Duration::from_secs(2)).await;
    let asset = h
        .upload(MediaKind::Image, "image/png", fixture_png(64, 64), &[])
        .await;

    let err = ingest(&h, &asset, &[]).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Timeout { .. }));
    assert!(err.is_recoverable());

    let stored = h.asset(asset.id).await;
    assert_eq!(stored.state, AssetState::Ingesting);
    assert_eq!(stored.moderation, ModerationFlag::Pending);
    assert!(stored.thumbnail_url.is_none());
    assert!(!h
        .storage
        .exists(&derived_key(asset.id, "thumbnail.jpg"))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_moderation_failure_is_never_treated_as_clean() {
    let h = Harness::new().await;
    h.moderator.fail_images("provider unavailable").await;
    let asset = h
        .upload(MediaKind::Image, "image/png", fixture_png(64, 64), &[])
        .await;

    let err = ingest(&h, &asset, &[]).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Moderation(_)));
    assert_eq!(h.asset(asset.id).await.state, AssetState::Ingesting);
}

#[tokio::test]
async fn test_duplicate_ingest_is_a_no_op() {
    let h = Harness::with_detected(&["tree"]).await;
    let asset = h
        .upload(MediaKind::Image, "image/png", fixture_png(64, 64), &[])
        .await;

    assert_eq!(ingest(&h, &asset, &[]).await.unwrap(), IngestOutcome::Completed);
    let first = h.asset(asset.id).await;

    let again = ingest(&h, &asset, &["extra"]).await.unwrap();
    assert_eq!(again, IngestOutcome::AlreadyProcessed(AssetState::Complete));
    assert_eq!(h.asset(asset.id).await, first);
}

#[tokio::test]
async fn test_undecodable_image_fails_the_asset() {
    let h = Harness::new().await;
    let asset = h
        .upload(MediaKind::Image, "image/png", b"garbage".to_vec(), &[])
        .await;

    assert_eq!(ingest(&h, &asset, &[]).await.unwrap(), IngestOutcome::Failed);
    let stored = h.asset(asset.id).await;
    assert_eq!(stored.state, AssetState::Failed);
    assert!(stored.metadata.unwrap()["error"].is_string());
}

#[tokio::test]
async fn test_storage_key_mismatch_is_rejected() {
    let h = Harness::new().await;
    let asset = h
        .upload(MediaKind::Image, "image/png", fixture_png(64, 64), &[])
        .await;

    let err = h
        .orchestrator
        .begin_ingest(asset.id, "media/someone/else.png", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::StorageKeyMismatch { .. }));
    assert!(!err.is_recoverable());
    assert_eq!(h.asset(asset.id).await.state, AssetState::Reserved);
}

#[tokio::test]
async fn test_deleted_asset_is_discarded() {
    let h = Harness::new().await;
    let asset = h
        .upload(MediaKind::Image, "image/png", fixture_png(64, 64), &[])
        .await;
    mutate(&h, asset.id, |a| a.deleted_at = Some(chrono::Utc::now())).await;

    assert_eq!(ingest(&h, &asset, &[]).await.unwrap(), IngestOutcome::Discarded);
}

#[tokio::test]
async fn test_profile_notification_failure_rolls_back() {
    let h = Harness::new().await;
    h.notifier.set_failing(true);
    let asset = h
        .upload(MediaKind::ProfileImage, "image/png", fixture_png(128, 128), &[])
        .await;

    let err = ingest(&h, &asset, &[]).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Notification(_)));
    assert!(err.is_recoverable());
    let stored = h.asset(asset.id).await;
    assert_eq!(stored.state, AssetState::Ingesting);
    assert!(stored.thumbnail_url.is_none());

    h.notifier.set_failing(false);
    assert_eq!(ingest(&h, &asset, &[]).await.unwrap(), IngestOutcome::Completed);

    let stored = h.asset(asset.id).await;
    let events = h.notifier.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].user_id, h.owner_id);
    assert_eq!(Some(events[0].url.clone()), stored.thumbnail_url);
}

#[tokio::test]
async fn test_video_waits_for_both_jobs() {
    let h = Harness::new().await;
    let asset = upload_video(&h).await;

    assert_eq!(
        ingest(&h, &asset, &[]).await.unwrap(),
        IngestOutcome::PendingExternal
    );
    assert_eq!(h.asset(asset.id).await.state, AssetState::PendingExternal);

    let records = h.ledger.list_by_asset(asset.id).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == JobStatus::Pending));

    let moderation_job = ScriptedModerator::job_id_for(asset.id);
    let transcode_job = ScriptedTranscoder::job_id_for(asset.id);

    let merged = h
        .orchestrator
        .reconcile_external_job(&moderation_job, Some(asset.id), &succeeded(&["Violence", "Weapons"]))
        .await
        .unwrap();
    assert_eq!(merged, ReconcileOutcome::Merged);
    let stored = h.asset(asset.id).await;
    assert_eq!(stored.state, AssetState::PendingExternal);
    assert_eq!(stored.moderation, ModerationFlag::Flagged);

    let finalized = h
        .orchestrator
        .reconcile_external_job(&transcode_job, Some(asset.id), &failed("codec unsupported"))
        .await
        .unwrap();
    assert_eq!(finalized, ReconcileOutcome::Finalized(AssetState::Flagged));

    let stored = h.asset(asset.id).await;
    assert_eq!(stored.state, AssetState::Flagged);
    assert_eq!(stored.moderation_labels, vec!["Violence", "Weapons"]);
    assert!(stored.manifest_url.is_none());

    let transcode = h.ledger.get(&transcode_job).await.unwrap().unwrap();
    assert_eq!(transcode.status, JobStatus::Failed);
    assert_eq!(transcode.failure_reason.as_deref(), Some("codec unsupported"));
    assert!(transcode.expires_at.is_some());
}

#[tokio::test]
async fn test_redelivered_video_ingest_submits_each_job_once() {
    let h = Harness::new().await;

    let sequential = upload_video(&h).await;
    assert_eq!(
        ingest(&h, &sequential, &[]).await.unwrap(),
        IngestOutcome::PendingExternal
    );
    assert_eq!(
        ingest(&h, &sequential, &[]).await.unwrap(),
        IngestOutcome::AlreadyProcessed(AssetState::PendingExternal)
    );
    assert_eq!(h.ledger.list_by_asset(sequential.id).await.unwrap().len(), 2);
    assert_eq!(h.moderator.submissions(), 1);
    assert_eq!(h.transcoder.submissions(), 1);

    let concurrent = upload_video(&h).await;
    let (first, second) = tokio::join!(
        ingest(&h, &concurrent, &[]),
        ingest(&h, &concurrent, &[])
    );
    let mut outcomes = vec![first.unwrap(), second.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, IngestOutcome::AlreadyProcessed(_)));
    assert_eq!(
        outcomes,
        vec![
            IngestOutcome::PendingExternal,
            IngestOutcome::AlreadyProcessed(AssetState::PendingExternal)
        ]
    );

    let records = h.ledger.list_by_asset(concurrent.id).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r.kind == JobKind::VideoModeration));
    assert!(records.iter().any(|r| r.kind == JobKind::VideoTranscode));
    assert_eq!(h.moderator.submissions(), 2);
    assert_eq!(h.transcoder.submissions(), 2);
    assert_eq!(h.asset(concurrent.id).await.state, AssetState::PendingExternal);
}

#[tokio::test]
async fn test_clean_video_completes_with_manifest() {
    let h = Harness::new().await;
    let asset = upload_video(&h).await;
    ingest(&h, &asset, &[]).await.unwrap();

    h.orchestrator
        .reconcile_external_job(
            &ScriptedTranscoder::job_id_for(asset.id),
            Some(asset.id),
            &succeeded(&[]),
        )
        .await
        .unwrap();
    let outcome = h
        .orchestrator
        .reconcile_external_job(
            &ScriptedModerator::job_id_for(asset.id),
            Some(asset.id),
            &succeeded(&["Suggestive"]),
        )
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Finalized(AssetState::Complete));

    let stored = h.asset(asset.id).await;
    assert_eq!(stored.moderation, ModerationFlag::Clean);
    assert_eq!(
        stored.manifest_url,
        Some(h.storage.public_url(&format!("transcoded/{}/index.m3u8", asset.id)))
    );
    let metadata = stored.metadata.unwrap();
    assert_eq!(metadata["duration"], 12.5);
    assert_eq!(metadata["codec"], "h264");
    assert_eq!(metadata["aspect_ratio"], "16:9");
}

#[tokio::test]
async fn test_failed_transcode_fails_clean_video() {
    let h = Harness::new().await;
    let asset = upload_video(&h).await;
    ingest(&h, &asset, &[]).await.unwrap();

    h.orchestrator
        .reconcile_external_job(
            &ScriptedModerator::job_id_for(asset.id),
            Some(asset.id),
            &succeeded(&[]),
        )
        .await
        .unwrap();
    let outcome = h
        .orchestrator
        .reconcile_external_job(
            &ScriptedTranscoder::job_id_for(asset.id),
            Some(asset.id),
            &failed("out of memory"),
        )
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Finalized(AssetState::Failed));
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let h = Harness::new().await;
    let asset = upload_video(&h).await;
    ingest(&h, &asset, &[]).await.unwrap();
    let job = ScriptedModerator::job_id_for(asset.id);

    let first = h
        .orchestrator
        .reconcile_external_job(&job, Some(asset.id), &succeeded(&["Violence"]))
        .await
        .unwrap();
    assert_eq!(first, ReconcileOutcome::Merged);
    let after_first = h.asset(asset.id).await;

    // A conflicting replay does not overwrite the first terminal outcome.
    let replay = h
        .orchestrator
        .reconcile_external_job(&job, Some(asset.id), &succeeded(&[]))
        .await
        .unwrap();
    assert_eq!(replay, ReconcileOutcome::Duplicate);
    assert_eq!(h.asset(asset.id).await, after_first);
    assert_eq!(
        h.ledger.get(&job).await.unwrap().unwrap().status,
        JobStatus::Succeeded
    );
}

#[tokio::test]
async fn test_unknown_job_handling() {
    let h = Harness::new().await;

    let untagged = h
        .orchestrator
        .reconcile_external_job("who-knows", None, &succeeded(&[]))
        .await
        .unwrap();
    assert_eq!(untagged, ReconcileOutcome::Discarded);

    let asset = upload_video(&h).await;
    mutate(&h, asset.id, |a| a.state = AssetState::Ingesting).await;
    let err = h
        .orchestrator
        .reconcile_external_job("early-job", Some(asset.id), &succeeded(&[]))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotYetVisible { .. }));
    assert!(err.is_recoverable());

    mutate(&h, asset.id, |a| a.state = AssetState::Complete).await;
    let settled = h
        .orchestrator
        .reconcile_external_job("late-job", Some(asset.id), &succeeded(&[]))
        .await
        .unwrap();
    assert_eq!(settled, ReconcileOutcome::Discarded);
}

#[tokio::test]
async fn test_results_merged_during_ingest_finalize_on_resume() {
    let h = Harness::new().await;
    let asset = upload_video(&h).await;
    mutate(&h, asset.id, |a| a.state = AssetState::Ingesting).await;

    let moderation_job = ScriptedModerator::job_id_for(asset.id);
    let transcode_job = ScriptedTranscoder::job_id_for(asset.id);
    for (job, kind) in [
        (&moderation_job, JobKind::VideoModeration),
        (&transcode_job, JobKind::VideoTranscode),
    ] {
        let record =
            ExternalJobRecord::pending(job.clone(), asset.id, kind, asset.storage_key.clone());
        h.ledger.put(&record).await.unwrap();
    }

    for job in [&moderation_job, &transcode_job] {
        let outcome = h
            .orchestrator
            .reconcile_external_job(job, Some(asset.id), &succeeded(&[]))
            .await
            .unwrap();
        // Not finalized while the asset is still ingesting.
        assert_eq!(outcome, ReconcileOutcome::Merged);
    }
    assert_eq!(h.asset(asset.id).await.state, AssetState::Ingesting);

    assert_eq!(ingest(&h, &asset, &[]).await.unwrap(), IngestOutcome::Completed);
    assert_eq!(h.asset(asset.id).await.state, AssetState::Complete);
    assert_eq!(h.moderator.submissions(), 0);
    assert_eq!(h.transcoder.submissions(), 0);
}

#[tokio::test]
async fn test_sweep_reconciles_finished_transcodes() {
    let h = Harness::new().await;
    let asset = upload_video(&h).await;
    ingest(&h, &asset, &[]).await.unwrap();
    let transcode_job = ScriptedTranscoder::job_id_for(asset.id);

    h.transcoder
        .set_status(&transcode_job, JobStatus::InProgress, None)
        .await;
    let report = h.orchestrator.sweep_transcode_jobs().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.still_running, 1);
    assert_eq!(
        h.ledger.get(&transcode_job).await.unwrap().unwrap().status,
        JobStatus::InProgress
    );

    h.orchestrator
        .reconcile_external_job(
            &ScriptedModerator::job_id_for(asset.id),
            Some(asset.id),
            &succeeded(&[]),
        )
        .await
        .unwrap();
    h.transcoder
        .set_status(&transcode_job, JobStatus::Succeeded, None)
        .await;
    let report = h.orchestrator.sweep_transcode_jobs().await.unwrap();
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(h.asset(asset.id).await.state, AssetState::Complete);

    let report = h.orchestrator.sweep_transcode_jobs().await.unwrap();
    assert_eq!(report, SweepReport::default());
}

#[tokio::test]
async fn test_sweep_fails_vanished_transcode() {
    let h = Harness::new().await;
    let asset = upload_video(&h).await;
    ingest(&h, &asset, &[]).await.unwrap();
    let transcode_job = ScriptedTranscoder::job_id_for(asset.id);
    h.transcoder.forget(&transcode_job).await;

    let report = h.orchestrator.sweep_transcode_jobs().await.unwrap();
    assert_eq!(report.reconciled, 1);
    let record = h.ledger.get(&transcode_job).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(h.asset(asset.id).await.state, AssetState::PendingExternal);
}

#[tokio::test]
async fn test_transient_submission_failures_are_retried() {
    let h = Harness::new().await;
    h.moderator.fail_next_submissions(2);
    let asset = upload_video(&h).await;

    assert_eq!(
        ingest(&h, &asset, &[]).await.unwrap(),
        IngestOutcome::PendingExternal
    );
    assert_eq!(h.moderator.submissions(), 1);

    // Resubmission is skipped once both jobs are recorded.
    assert_eq!(
        ingest(&h, &asset, &[]).await.unwrap(),
        IngestOutcome::AlreadyProcessed(AssetState::PendingExternal)
    );
    assert_eq!(h.moderator.submissions(), 1);
    assert_eq!(h.transcoder.submissions(), 1);
}

#[tokio::test]
async fn test_misconfigured_submission_is_unrecoverable() {
    let h = Harness::new().await;
    h.moderator
        .reject_submissions("notification channel not configured")
        .await;
    let asset = upload_video(&h).await;

    let err = ingest(&h, &asset, &[]).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Submission {
            retryable: false,
            ..
        }
    ));
    assert!(!err.is_recoverable());
    assert_eq!(h.asset(asset.id).await.state, AssetState::Ingesting);
    assert!(h.ledger.is_empty().await);
}

#[test]
fn test_finalize_priority() {
    let mut asset = MediaAsset::reserved(
        Uuid::new_v4(),
        "media/o/a.mp4".to_string(),
        "http://media.test/media/o/a.mp4".to_string(),
        MediaKind::Video,
        "video/mp4".to_string(),
        Uuid::new_v4(),
        None,
        &[],
    );
    asset.state = AssetState::PendingExternal;
    record_job_status(&mut asset, JobKind::VideoModeration, "m", JobStatus::Failed, Some("x"));
    assert_eq!(Orchestrator::finalize_if_resolved(&mut asset), None);

    record_job_status(&mut asset, JobKind::VideoTranscode, "t", JobStatus::Succeeded, None);
    assert_eq!(
        Orchestrator::finalize_if_resolved(&mut asset),
        Some(AssetState::Failed)
    );

    asset.moderation = ModerationFlag::Flagged;
    assert_eq!(
        Orchestrator::finalize_if_resolved(&mut asset),
        Some(AssetState::Flagged)
    );
}
