//! Transcoding Adapter backed by `ffmpeg`.
//!
//! Jobs run in the background on the submitting worker and publish their
//! progress as a status marker next to the output in the object store, so any
//! worker's poll sweep can observe them. The runner rewrites the marker on a
//! heartbeat while it waits for a slot and while ffmpeg runs; a marker that
//! stops moving means the runner died. Job ids are derived from the asset id,
//! which makes resubmission after a crash return the same job.

use super::validate_executable_path;
use crate::error::{ProcessingError, ProcessingResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mosaic_core::models::JobStatus;
use mosaic_core::TranscodeConfig;
use mosaic_storage::{Storage, StorageError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

const JOB_ID_PREFIX: &str = "ffmpeg-";
const MANIFEST_NAME: &str = "index.m3u8";
const STATUS_MARKER_NAME: &str = "_status.json";

/// Heartbeats per stale window, so a live runner never looks stale.
const HEARTBEATS_PER_STALE_WINDOW: u64 = 4;
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Canonical output profile: 720p-capped H.264 + AAC.
const OUTPUT_MAX_HEIGHT: u32 = 720;
const OUTPUT_VIDEO_BITRATE_KBPS: u32 = 2800;

/// Status of a transcode job as last published by its runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeState {
    pub status: JobStatus,
    pub failure_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TranscodeState {
    fn new(status: JobStatus, failure_reason: Option<String>) -> Self {
        Self {
            status,
            failure_reason,
            updated_at: Utc::now(),
        }
    }
}

/// Asynchronous transcode job submission and polling.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Start (or rejoin) the transcode of `source_key` and return the provider job id.
    async fn submit(&self, asset_id: Uuid, source_key: &str) -> ProcessingResult<String>;

    async fn poll_status(&self, job_id: &str) -> ProcessingResult<TranscodeState>;

    /// Storage key of the streaming manifest produced for `asset_id`.
    fn manifest_key(&self, asset_id: Uuid) -> String;
}

#[derive(Clone)]
pub struct FfmpegTranscoder {
    storage: Arc<dyn Storage>,
    config: TranscodeConfig,
    permits: Arc<Semaphore>,
}

impl FfmpegTranscoder {
    pub fn new(storage: Arc<dyn Storage>, config: TranscodeConfig) -> ProcessingResult<Self> {
        validate_executable_path(&config.ffmpeg_path)
            .map_err(|e| ProcessingError::Config(format!("Invalid ffmpeg_path: {}", e)))?;
        if config.hls_segment_duration == 0 {
            return Err(ProcessingError::Config(
                "hls_segment_duration must be greater than zero".to_string(),
            ));
        }
        let permits = Arc::new(Semaphore::new(config.max_concurrent_transcodes.max(1)));
        Ok(Self {
            storage,
            config,
            permits,
        })
    }

    pub fn job_id_for(asset_id: Uuid) -> String {
        format!("{}{}", JOB_ID_PREFIX, asset_id)
    }

    fn asset_id_from_job(job_id: &str) -> ProcessingResult<Uuid> {
        job_id
            .strip_prefix(JOB_ID_PREFIX)
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| ProcessingError::JobNotFound(job_id.to_string()))
    }

    fn output_key(&self, asset_id: Uuid, name: &str) -> String {
        format!("{}/{}/{}", self.config.output_prefix, asset_id, name)
    }

    async fn read_state(&self, asset_id: Uuid) -> ProcessingResult<Option<TranscodeState>> {
        let key = self.output_key(asset_id, STATUS_MARKER_NAME);
        match self.storage.download(&key).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                ProcessingError::Transcode(format!("Corrupt status marker {}: {}", key, e))
            }),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_state(&self, asset_id: Uuid, state: &TranscodeState) -> ProcessingResult<()> {
        let key = self.output_key(asset_id, STATUS_MARKER_NAME);
        let body = serde_json::to_vec(state)
            .map_err(|e| ProcessingError::Transcode(e.to_string()))?;
        self.storage
            .upload_with_key(&key, body, "application/json")
            .await?;
        Ok(())
    }

    fn heartbeat_interval(&self) -> Duration {
        let stale_ms = self.config.stale_after_secs.saturating_mul(1000);
        Duration::from_millis(stale_ms / HEARTBEATS_PER_STALE_WINDOW).max(MIN_HEARTBEAT_INTERVAL)
    }

    /// Drive `work` to completion, republishing `status` on every heartbeat tick.
    async fn with_heartbeat<F, T>(&self, asset_id: Uuid, status: JobStatus, work: F) -> T
    where
        F: Future<Output = T>,
    {
        tokio::pin!(work);
        let mut ticker = tokio::time::interval(self.heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the caller already published the marker.
        ticker.tick().await;

        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = ticker.tick() => {
                    if let Err(e) = self.write_state(asset_id, &TranscodeState::new(status, None)).await {
                        tracing::warn!(asset_id = %asset_id, error = %e, "Failed to refresh transcode status");
                    }
                }
            }
        }
    }

    #[tracing::instrument(skip(self, source_key))]
    async fn run(&self, asset_id: Uuid, source_key: String) {
        let permit = self
            .with_heartbeat(
                asset_id,
                JobStatus::Pending,
                self.permits.clone().acquire_owned(),
            )
            .await;
        let _permit = match permit {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let start = std::time::Instant::now();
        let result = async {
            self.write_state(asset_id, &TranscodeState::new(JobStatus::InProgress, None))
                .await?;
            self.with_heartbeat(
                asset_id,
                JobStatus::InProgress,
                self.transcode_and_upload(asset_id, &source_key),
            )
            .await
        }
        .await;

        let final_state = match result {
            Ok(segments) => {
                tracing::info!(
                    asset_id = %asset_id,
                    segments = segments,
                    duration_ms = start.elapsed().as_millis(),
                    "Transcode completed"
                );
                TranscodeState::new(JobStatus::Succeeded, None)
            }
            Err(e) => {
                tracing::error!(asset_id = %asset_id, error = %e, "Transcode failed");
                TranscodeState::new(JobStatus::Failed, Some(e.to_string()))
            }
        };

        if let Err(e) = self.write_state(asset_id, &final_state).await {
            // The sweep will report this job stale and fail it.
            tracing::error!(asset_id = %asset_id, error = %e, "Failed to publish transcode status");
        }
    }

    async fn transcode_and_upload(&self, asset_id: Uuid, source_key: &str) -> ProcessingResult<usize> {
        let workdir = tempfile::tempdir()?;
        let input_path = workdir.path().join("source");
        let output_dir = workdir.path().join("out");
        tokio::fs::create_dir_all(&output_dir).await?;

        let source = self.storage.download(source_key).await?;
        tokio::fs::write(&input_path, source).await?;

        self.run_ffmpeg(&input_path, &output_dir).await?;

        let mut uploaded = 0;
        let mut entries = tokio::fs::read_dir(&output_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let content_type = if name.ends_with(".m3u8") {
                "application/vnd.apple.mpegurl"
            } else {
                "video/mp2t"
            };
            let data = tokio::fs::read(entry.path()).await?;
            self.storage
                .upload_with_key(&self.output_key(asset_id, &name), data, content_type)
                .await?;
            uploaded += 1;
        }

        if uploaded == 0 {
            return Err(ProcessingError::Transcode("ffmpeg produced no output".to_string()));
        }
        Ok(uploaded)
    }

    async fn run_ffmpeg(&self, input_path: &Path, output_dir: &Path) -> ProcessingResult<()> {
        let playlist_path = output_dir.join(MANIFEST_NAME);
        let segment_pattern = output_dir.join("segment_%03d.ts");

        let args = vec![
            "-i".to_string(),
            input_path.to_string_lossy().to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "fast".to_string(),
            "-profile:v".to_string(),
            "main".to_string(),
            "-vf".to_string(),
            format!("scale=-2:'min({},ih)'", OUTPUT_MAX_HEIGHT),
            "-b:v".to_string(),
            format!("{}k", OUTPUT_VIDEO_BITRATE_KBPS),
            "-maxrate".to_string(),
            format!("{}k", (OUTPUT_VIDEO_BITRATE_KBPS as f32 * 1.2) as u32),
            "-bufsize".to_string(),
            format!("{}k", OUTPUT_VIDEO_BITRATE_KBPS * 2),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "128k".to_string(),
            "-ac".to_string(),
            "2".to_string(),
            "-ar".to_string(),
            "48000".to_string(),
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            self.config.hls_segment_duration.to_string(),
            "-hls_playlist_type".to_string(),
            "vod".to_string(),
            "-hls_segment_filename".to_string(),
            segment_pattern.to_string_lossy().to_string(),
            playlist_path.to_string_lossy().to_string(),
        ];

        let output = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ProcessingError::Transcode(format!("Failed to execute ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProcessingError::Transcode(format!("FFmpeg failed: {}", stderr)));
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn submit(&self, asset_id: Uuid, source_key: &str) -> ProcessingResult<String> {
        let job_id = Self::job_id_for(asset_id);

        if let Some(state) = self.read_state(asset_id).await? {
            if state.status != JobStatus::Failed {
                tracing::info!(
                    job_id = %job_id,
                    status = %state.status,
                    "Transcode already submitted, rejoining"
                );
                return Ok(job_id);
            }
        }

        self.write_state(asset_id, &TranscodeState::new(JobStatus::Pending, None))
            .await?;

        let runner = self.clone();
        let source_key = source_key.to_string();
        tokio::spawn(async move {
            runner.run(asset_id, source_key).await;
        });

        tracing::info!(job_id = %job_id, "Transcode job submitted");
        Ok(job_id)
    }

    async fn poll_status(&self, job_id: &str) -> ProcessingResult<TranscodeState> {
        let asset_id = Self::asset_id_from_job(job_id)?;
        let state = self
            .read_state(asset_id)
            .await?
            .ok_or_else(|| ProcessingError::JobNotFound(job_id.to_string()))?;

        let stale_after = ChronoDuration::seconds(self.config.stale_after_secs as i64);
        if !state.status.is_terminal() && Utc::now() - state.updated_at > stale_after {
            tracing::warn!(job_id = %job_id, updated_at = %state.updated_at, "Transcode job is stale");
            return Ok(TranscodeState::new(
                JobStatus::Failed,
                Some("transcode runner stopped reporting progress".to_string()),
            ));
        }

        Ok(state)
    }

    fn manifest_key(&self, asset_id: Uuid) -> String {
        self.output_key(asset_id, MANIFEST_NAME)
    }
}
