//! Scripted adapters and a wired-up orchestrator for tests.
//!
//! Storage is a real [`LocalStorage`] under a temporary directory and the
//! stores are the in-memory implementations, so only the cloud providers
//! are faked.

use crate::notifier::{NotifyError, ProfileNotifier, ProfilePictureUpdated};
use crate::orchestrator::{Orchestrator, OrchestratorDeps};
use async_trait::async_trait;
use chrono::Utc;
use mosaic_analysis::{
    AnalysisError, AnalysisResult, ImageModerator, ModerationLabel, ModerationTaxonomy,
    ModerationVerdict, ObjectDetector, VideoModerationStatus, VideoModerator,
};
use mosaic_core::models::{JobStatus, MediaAsset, MediaKind};
use mosaic_core::{AnalysisConfig, MediaConfig, OrchestratorConfig};
use mosaic_db::{AssetStore, MemoryAssetStore};
use mosaic_ledger::MemoryJobLedger;
use mosaic_processing::{
    ProcessingError, ProcessingResult, TranscodeState, Transcoder, VideoMetadata, VideoProber,
};
use mosaic_storage::keys::{extension_for_content_type, upload_key};
use mosaic_storage::{LocalStorage, Storage};
use std::collections::{BTreeSet, HashMap};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Image and video moderation with scripted answers.
#[derive(Default)]
pub struct ScriptedModerator {
    verdict: Mutex<Option<ModerationVerdict>>,
    image_failure: Mutex<Option<String>>,
    image_delay: Mutex<Option<Duration>>,
    transient_submit_failures: AtomicU32,
    rejected_submissions: Mutex<Option<String>>,
    submissions: AtomicUsize,
    video_statuses: Mutex<HashMap<String, VideoModerationStatus>>,
    label_fetches: AtomicUsize,
}

impl ScriptedModerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_id_for(asset_id: Uuid) -> String {
        format!("modjob-{}", asset_id)
    }

    /// Flag every image with the given labels.
    pub async fn flag_with(&self, labels: &[&str]) {
        let labels = labels
            .iter()
            .map(|name| ModerationLabel {
                name: name.to_string(),
                parent_name: None,
                confidence: 99.0,
            })
            .collect();
        *self.verdict.lock().await = Some(ModerationVerdict {
            flagged: true,
            labels,
        });
    }

    pub async fn fail_images(&self, message: &str) {
        *self.image_failure.lock().await = Some(message.to_string());
    }

    pub async fn delay_images(&self, delay: Duration) {
        *self.image_delay.lock().await = Some(delay);
    }

    /// The next `count` video submissions fail with a retryable error.
    pub fn fail_next_submissions(&self, count: u32) {
        self.transient_submit_failures.store(count, Ordering::SeqCst);
    }

    /// Every video submission fails with a configuration error.
    pub async fn reject_submissions(&self, message: &str) {
        *self.rejected_submissions.lock().await = Some(message.to_string());
    }

    pub async fn set_video_status(&self, job_id: &str, status: VideoModerationStatus) {
        self.video_statuses
            .lock()
            .await
            .insert(job_id.to_string(), status);
    }

    /// Number of accepted video submissions.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Number of video label lookups made against the provider.
    pub fn label_fetches(&self) -> usize {
        self.label_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageModerator for ScriptedModerator {
    async fn moderate_image(&self, _key: &str) -> AnalysisResult<ModerationVerdict> {
        let delay = *self.image_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.image_failure.lock().await.clone() {
            return Err(AnalysisError::Provider(message));
        }
        Ok(self
            .verdict
            .lock()
            .await
            .clone()
            .unwrap_or_else(ModerationVerdict::clean))
    }
}

#[async_trait]
impl VideoModerator for ScriptedModerator {
    async fn submit_video_moderation(&self, asset_id: Uuid, _key: &str) -> AnalysisResult<String> {
        if let Some(message) = self.rejected_submissions.lock().await.clone() {
            return Err(AnalysisError::Configuration(message));
        }
        let remaining = self.transient_submit_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_submit_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(AnalysisError::Provider("throttled".to_string()));
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(Self::job_id_for(asset_id))
    }

    async fn fetch_video_moderation_labels(
        &self,
        job_id: &str,
    ) -> AnalysisResult<VideoModerationStatus> {
        self.label_fetches.fetch_add(1, Ordering::SeqCst);
        self.video_statuses
            .lock()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| AnalysisError::JobNotFound(job_id.to_string()))
    }
}

/// Object detection returning a fixed tag set.
pub struct ScriptedDetector {
    tags: BTreeSet<String>,
}

impl ScriptedDetector {
    pub fn new(tags: &[&str]) -> Self {
        Self {
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ObjectDetector for ScriptedDetector {
    async fn detect_objects(&self, _key: &str) -> BTreeSet<String> {
        self.tags.clone()
    }
}

/// Transcoder whose job states are set by the test.
#[derive(Default)]
pub struct ScriptedTranscoder {
    states: Mutex<HashMap<String, TranscodeState>>,
    submissions: AtomicUsize,
}

impl ScriptedTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_id_for(asset_id: Uuid) -> String {
        format!("tx-{}", asset_id)
    }

    pub async fn set_status(&self, job_id: &str, status: JobStatus, reason: Option<&str>) {
        self.states.lock().await.insert(
            job_id.to_string(),
            TranscodeState {
                status,
                failure_reason: reason.map(str::to_string),
                updated_at: Utc::now(),
            },
        );
    }

    /// Drop all knowledge of a job, as a provider that expired it would.
    pub async fn forget(&self, job_id: &str) {
        self.states.lock().await.remove(job_id);
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for ScriptedTranscoder {
    async fn submit(&self, asset_id: Uuid, _source_key: &str) -> ProcessingResult<String> {
        let job_id = Self::job_id_for(asset_id);
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.states
            .lock()
            .await
            .entry(job_id.clone())
            .or_insert_with(|| TranscodeState {
                status: JobStatus::Pending,
                failure_reason: None,
                updated_at: Utc::now(),
            });
        Ok(job_id)
    }

    async fn poll_status(&self, job_id: &str) -> ProcessingResult<TranscodeState> {
        self.states
            .lock()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| ProcessingError::JobNotFound(job_id.to_string()))
    }

    fn manifest_key(&self, asset_id: Uuid) -> String {
        format!("transcoded/{}/index.m3u8", asset_id)
    }
}

/// Prober answering with a fixed 1080p clip description.
pub struct StaticProber;

#[async_trait]
impl VideoProber for StaticProber {
    async fn probe(&self, _source: &str) -> ProcessingResult<VideoMetadata> {
        Ok(VideoMetadata {
            duration: 12.5,
            width: 1920,
            height: 1080,
            codec: "h264".to_string(),
            bitrate: Some(4_000_000),
            framerate: Some(30.0),
            rotation: 0,
            aspect_ratio: Some("16:9".to_string()),
        })
    }
}

/// Profile notifier that records events and can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ProfilePictureUpdated>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn events(&self) -> Vec<ProfilePictureUpdated> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl ProfileNotifier for RecordingNotifier {
    async fn profile_picture_updated(&self, event: &ProfilePictureUpdated) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// A solid PNG of the given size.
pub fn fixture_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .expect("encode fixture png");
    buffer
}

/// Orchestrator wired to scripted adapters.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub assets: MemoryAssetStore,
    pub ledger: Arc<MemoryJobLedger>,
    pub storage: Arc<LocalStorage>,
    pub moderator: Arc<ScriptedModerator>,
    pub transcoder: Arc<ScriptedTranscoder>,
    pub notifier: Arc<RecordingNotifier>,
    pub owner_id: Uuid,
    _dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_detected(&[]).await
    }

    /// Harness whose detector reports `detected` for every image.
    pub async fn with_detected(detected: &[&str]) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let storage = Arc::new(
            LocalStorage::new(dir.path(), "http://media.test".to_string())
                .await
                .expect("create local storage"),
        );
        let assets = MemoryAssetStore::new();
        let ledger = Arc::new(MemoryJobLedger::default());
        let moderator = Arc::new(ScriptedModerator::new());
        let transcoder = Arc::new(ScriptedTranscoder::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let deps = OrchestratorDeps {
            assets: Arc::new(assets.clone()),
            ledger: ledger.clone(),
            storage: storage.clone(),
            detector: Arc::new(ScriptedDetector::new(detected)),
            image_moderator: moderator.clone(),
            video_moderator: moderator.clone(),
            transcoder: transcoder.clone(),
            prober: Arc::new(StaticProber),
            notifier: notifier.clone(),
        };
        let config = OrchestratorConfig {
            adapter_timeout_secs: 1,
            submission_max_attempts: 3,
            submission_base_backoff_ms: 1,
            transcode_sweep_interval_secs: 1,
        };
        let taxonomy = ModerationTaxonomy::new(AnalysisConfig::DEFAULT_TAXONOMY.split(','));
        let orchestrator = Orchestrator::new(deps, config, &MediaConfig::default(), taxonomy);

        Self {
            orchestrator,
            assets,
            ledger,
            storage,
            moderator,
            transcoder,
            notifier,
            owner_id: Uuid::new_v4(),
            _dir: dir,
        }
    }

    /// Insert a reserved asset without writing its binary.
    pub async fn reserve(&self, kind: MediaKind, content_type: &str, caller_tags: &[&str]) -> MediaAsset {
        let id = Uuid::new_v4();
        let extension = extension_for_content_type(content_type).unwrap_or("bin");
        let key = upload_key(self.owner_id, id, extension);
        let tags: Vec<String> = caller_tags.iter().map(|t| t.to_string()).collect();
        let asset = MediaAsset::reserved(
            id,
            key.clone(),
            self.storage.public_url(&key),
            kind,
            content_type.to_string(),
            self.owner_id,
            None,
            &tags,
        );
        self.assets
            .insert_reserved(&asset)
            .await
            .expect("insert reserved asset");
        asset
    }

    /// Reserve an asset and write `data` as its uploaded binary.
    pub async fn upload(
        &self,
        kind: MediaKind,
        content_type: &str,
        data: Vec<u8>,
        caller_tags: &[&str],
    ) -> MediaAsset {
        let asset = self.reserve(kind, content_type, caller_tags).await;
        self.storage
            .upload_with_key(&asset.storage_key, data, content_type)
            .await
            .expect("write upload");
        asset
    }

    pub async fn asset(&self, id: Uuid) -> MediaAsset {
        self.assets
            .get(id)
            .await
            .expect("read asset")
            .expect("asset exists")
    }
}
