//! Configuration module
//!
//! Everything is read from the environment (after loading `.env` when present)
//! into one `MosaicConfig`, then split into per-adapter sections that are
//! passed to constructors explicitly.

use std::env;
use std::str::FromStr;

use crate::storage_types::StorageBackend;

const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MAX_RENDITION_WIDTH: u32 = 8192;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, etc.)
    pub s3_endpoint: Option<String>,
    pub local_path: Option<String>,
    pub local_base_url: Option<String>,
    pub upload_url_expiry_secs: u64,
}

#[derive(Clone, Debug)]
pub struct MediaConfig {
    pub max_image_size_bytes: u64,
    pub max_video_size_bytes: u64,
    pub image_content_types: Vec<String>,
    pub video_content_types: Vec<String>,
    pub thumbnail_size: u32,
    pub optimize_max_width: u32,
    pub optimize_quality: u8,
    /// Responsive rendition ladder, ascending.
    pub rendition_widths: Vec<u32>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_image_size_bytes: 10 * 1024 * 1024,
            max_video_size_bytes: 500 * 1024 * 1024,
            image_content_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/gif".to_string(),
                "image/webp".to_string(),
            ],
            video_content_types: vec![
                "video/mp4".to_string(),
                "video/quicktime".to_string(),
                "video/webm".to_string(),
            ],
            thumbnail_size: 256,
            optimize_max_width: 2048,
            optimize_quality: 82,
            rendition_widths: vec![320, 640, 1024, 1920],
        }
    }
}

#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    pub aws_region: String,
    /// Bucket the analysed objects live in; Rekognition reads them directly.
    pub bucket: String,
    pub moderation_min_confidence: f32,
    pub detection_min_confidence: f32,
    pub detection_max_labels: i32,
    /// Labels (top-level or parent) that mark content as flagged.
    pub moderation_taxonomy: Vec<String>,
    pub video_moderation_sns_topic_arn: Option<String>,
    pub video_moderation_role_arn: Option<String>,
}

impl AnalysisConfig {
    pub const DEFAULT_TAXONOMY: &'static str =
        "Explicit Nudity,Nudity,Violence,Graphic Violence,Visually Disturbing";
}

#[derive(Clone, Debug)]
pub struct TranscodeConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub hls_segment_duration: u64,
    pub max_concurrent_transcodes: usize,
    /// Key prefix for transcoded output: `{prefix}/{asset_id}/index.m3u8`.
    pub output_prefix: String,
    /// An unfinished job whose status marker has not moved for this long is reported failed.
    pub stale_after_secs: u64,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            hls_segment_duration: 6,
            max_concurrent_transcodes: 2,
            output_prefix: "transcoded".to_string(),
            stale_after_secs: 2 * 60 * 60,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerBackend {
    DynamoDb,
    Memory,
}

impl FromStr for LedgerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dynamodb" => Ok(LedgerBackend::DynamoDb),
            "memory" => Ok(LedgerBackend::Memory),
            _ => Err(anyhow::anyhow!("Invalid ledger backend: {}", s)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub table_name: String,
    /// Name of the secondary index keyed by asset id.
    pub asset_index_name: String,
    pub terminal_ttl_hours: i64,
    pub aws_region: String,
}

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub upload_ready_queue_url: String,
    pub job_result_queue_url: String,
    pub dead_letter_queue_url: Option<String>,
    /// Deliveries after which a message is treated as poison.
    pub max_receive_count: u32,
    pub visibility_timeout_secs: u64,
    pub wait_time_secs: u64,
    pub max_messages: u32,
    pub max_workers: usize,
    pub handler_timeout_secs: u64,
    pub aws_region: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            upload_ready_queue_url: String::new(),
            job_result_queue_url: String::new(),
            dead_letter_queue_url: None,
            max_receive_count: 5,
            visibility_timeout_secs: 300,
            wait_time_secs: 20,
            max_messages: 10,
            max_workers: 4,
            handler_timeout_secs: 600,
            aws_region: "us-east-1".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Upper bound on any single adapter call.
    pub adapter_timeout_secs: u64,
    pub submission_max_attempts: u32,
    pub submission_base_backoff_ms: u64,
    pub transcode_sweep_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_secs: 30,
            submission_max_attempts: 4,
            submission_base_backoff_ms: 250,
            transcode_sweep_interval_secs: 60,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProfileNotifierConfig {
    pub url: Option<String>,
    /// HMAC-SHA256 key for the `X-Mosaic-Signature` header.
    pub secret: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct MosaicConfig {
    pub environment: String,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub media: MediaConfig,
    pub analysis: AnalysisConfig,
    pub transcode: TranscodeConfig,
    pub ledger: LedgerConfig,
    pub dispatcher: DispatcherConfig,
    pub orchestrator: OrchestratorConfig,
    pub profile_notifier: ProfileNotifierConfig,
}

impl MosaicConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        const UPLOAD_URL_EXPIRY_SECS: u64 = 900;
        const MAX_FILE_SIZE_MB: u64 = 10;
        const MAX_VIDEO_SIZE_MB: u64 = 500;
        const LEDGER_TERMINAL_TTL_HOURS: i64 = 72;
        const PROFILE_NOTIFY_TIMEOUT_SECS: u64 = 10;

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let aws_region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            max_connections: env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            timeout_seconds: env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
        };

        let storage = StorageConfig {
            backend: env::var("STORAGE_BACKEND")
                .unwrap_or_else(|_| "s3".to_string())
                .parse()?,
            s3_bucket: env_opt("S3_BUCKET"),
            s3_region: env_opt("S3_REGION").or_else(|| Some(aws_region.clone())),
            s3_endpoint: env_opt("S3_ENDPOINT"),
            local_path: env_opt("LOCAL_STORAGE_PATH"),
            local_base_url: env_opt("LOCAL_STORAGE_BASE_URL"),
            upload_url_expiry_secs: env_or("UPLOAD_URL_EXPIRY_SECS", UPLOAD_URL_EXPIRY_SECS),
        };

        let media_defaults = MediaConfig::default();
        let rendition_widths = env_list("RENDITION_WIDTHS", "320,640,1024,1920")
            .iter()
            .map(|w| {
                w.parse::<u32>()
                    .map_err(|_| anyhow::anyhow!("RENDITION_WIDTHS entry '{}' is not a number", w))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let media = MediaConfig {
            max_image_size_bytes: env_or("MAX_FILE_SIZE_MB", MAX_FILE_SIZE_MB) * 1024 * 1024,
            max_video_size_bytes: env_or("MAX_VIDEO_SIZE_MB", MAX_VIDEO_SIZE_MB) * 1024 * 1024,
            image_content_types: env_list(
                "IMAGE_CONTENT_TYPES",
                &media_defaults.image_content_types.join(","),
            ),
            video_content_types: env_list(
                "VIDEO_CONTENT_TYPES",
                &media_defaults.video_content_types.join(","),
            ),
            thumbnail_size: env_or("THUMBNAIL_SIZE", media_defaults.thumbnail_size),
            optimize_max_width: env_or("OPTIMIZE_MAX_WIDTH", media_defaults.optimize_max_width),
            optimize_quality: env_or("OPTIMIZE_QUALITY", media_defaults.optimize_quality),
            rendition_widths,
        };

        let analysis = AnalysisConfig {
            aws_region: aws_region.clone(),
            bucket: storage.s3_bucket.clone().unwrap_or_default(),
            moderation_min_confidence: env_or("MODERATION_MIN_CONFIDENCE", 50.0),
            detection_min_confidence: env_or("DETECTION_MIN_CONFIDENCE", 70.0),
            detection_max_labels: env_or("DETECTION_MAX_LABELS", 20),
            moderation_taxonomy: env_list(
                "MODERATION_TAXONOMY",
                AnalysisConfig::DEFAULT_TAXONOMY,
            ),
            video_moderation_sns_topic_arn: env_opt("VIDEO_MODERATION_SNS_TOPIC_ARN"),
            video_moderation_role_arn: env_opt("VIDEO_MODERATION_ROLE_ARN"),
        };

        let transcode_defaults = TranscodeConfig::default();
        let transcode = TranscodeConfig {
            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or(transcode_defaults.ffmpeg_path),
            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or(transcode_defaults.ffprobe_path),
            hls_segment_duration: env_or(
                "HLS_SEGMENT_DURATION",
                transcode_defaults.hls_segment_duration,
            ),
            max_concurrent_transcodes: env_or(
                "MAX_CONCURRENT_TRANSCODES",
                transcode_defaults.max_concurrent_transcodes,
            ),
            output_prefix: env::var("TRANSCODE_OUTPUT_PREFIX")
                .unwrap_or(transcode_defaults.output_prefix),
            stale_after_secs: env_or(
                "TRANSCODE_STALE_AFTER_SECS",
                transcode_defaults.stale_after_secs,
            ),
        };

        let ledger = LedgerConfig {
            backend: env::var("LEDGER_BACKEND")
                .unwrap_or_else(|_| "dynamodb".to_string())
                .parse()?,
            table_name: env::var("LEDGER_TABLE").unwrap_or_else(|_| "mosaic-jobs".to_string()),
            asset_index_name: env::var("LEDGER_ASSET_INDEX")
                .unwrap_or_else(|_| "asset_id-index".to_string()),
            terminal_ttl_hours: env_or("LEDGER_TERMINAL_TTL_HOURS", LEDGER_TERMINAL_TTL_HOURS),
            aws_region: aws_region.clone(),
        };

        let dispatcher_defaults = DispatcherConfig::default();
        let dispatcher = DispatcherConfig {
            upload_ready_queue_url: env::var("UPLOAD_READY_QUEUE_URL")
                .map_err(|_| anyhow::anyhow!("UPLOAD_READY_QUEUE_URL must be set"))?,
            job_result_queue_url: env::var("JOB_RESULT_QUEUE_URL")
                .map_err(|_| anyhow::anyhow!("JOB_RESULT_QUEUE_URL must be set"))?,
            dead_letter_queue_url: env_opt("DEAD_LETTER_QUEUE_URL"),
            max_receive_count: env_or("QUEUE_MAX_RECEIVE_COUNT", dispatcher_defaults.max_receive_count),
            visibility_timeout_secs: env_or(
                "QUEUE_VISIBILITY_TIMEOUT_SECS",
                dispatcher_defaults.visibility_timeout_secs,
            ),
            wait_time_secs: env_or("QUEUE_WAIT_TIME_SECS", dispatcher_defaults.wait_time_secs),
            max_messages: env_or("QUEUE_MAX_MESSAGES", dispatcher_defaults.max_messages),
            max_workers: env_or("DISPATCHER_MAX_WORKERS", dispatcher_defaults.max_workers),
            handler_timeout_secs: env_or(
                "DISPATCHER_HANDLER_TIMEOUT_SECS",
                dispatcher_defaults.handler_timeout_secs,
            ),
            aws_region: aws_region.clone(),
        };

        let orchestrator_defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            adapter_timeout_secs: env_or(
                "ADAPTER_TIMEOUT_SECS",
                orchestrator_defaults.adapter_timeout_secs,
            ),
            submission_max_attempts: env_or(
                "SUBMISSION_MAX_ATTEMPTS",
                orchestrator_defaults.submission_max_attempts,
            ),
            submission_base_backoff_ms: env_or(
                "SUBMISSION_BASE_BACKOFF_MS",
                orchestrator_defaults.submission_base_backoff_ms,
            ),
            transcode_sweep_interval_secs: env_or(
                "TRANSCODE_SWEEP_INTERVAL_SECS",
                orchestrator_defaults.transcode_sweep_interval_secs,
            ),
        };

        let profile_notifier = ProfileNotifierConfig {
            url: env_opt("PROFILE_NOTIFY_URL"),
            secret: env_opt("PROFILE_NOTIFY_SECRET"),
            timeout_secs: env_or("PROFILE_NOTIFY_TIMEOUT_SECS", PROFILE_NOTIFY_TIMEOUT_SECS),
        };

        let config = Self {
            environment,
            database,
            storage,
            media,
            analysis,
            transcode,
            ledger,
            dispatcher,
            orchestrator,
            profile_notifier,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        match self.storage.backend {
            StorageBackend::S3 if self.storage.s3_bucket.is_none() => {
                return Err(anyhow::anyhow!("S3_BUCKET is required for the s3 storage backend"));
            }
            StorageBackend::Local
                if self.storage.local_path.is_none() || self.storage.local_base_url.is_none() =>
            {
                return Err(anyhow::anyhow!(
                    "LOCAL_STORAGE_PATH and LOCAL_STORAGE_BASE_URL are required for the local storage backend"
                ));
            }
            _ => {}
        }

        if self.media.rendition_widths.is_empty() {
            return Err(anyhow::anyhow!("RENDITION_WIDTHS must list at least one width"));
        }
        if let Some(w) = self
            .media
            .rendition_widths
            .iter()
            .find(|w| **w == 0 || **w > MAX_RENDITION_WIDTH)
        {
            return Err(anyhow::anyhow!(
                "Rendition width {} is outside 1..={}",
                w,
                MAX_RENDITION_WIDTH
            ));
        }
        if self.media.optimize_quality == 0 || self.media.optimize_quality > 100 {
            return Err(anyhow::anyhow!("OPTIMIZE_QUALITY must be between 1 and 100"));
        }

        if self.analysis.moderation_taxonomy.is_empty() {
            return Err(anyhow::anyhow!("MODERATION_TAXONOMY must not be empty"));
        }
        // Either both halves of the notification channel are set or neither.
        if self.analysis.video_moderation_sns_topic_arn.is_some()
            != self.analysis.video_moderation_role_arn.is_some()
        {
            return Err(anyhow::anyhow!(
                "VIDEO_MODERATION_SNS_TOPIC_ARN and VIDEO_MODERATION_ROLE_ARN must be set together"
            ));
        }

        if self.transcode.hls_segment_duration == 0 {
            return Err(anyhow::anyhow!("HLS_SEGMENT_DURATION must be greater than zero"));
        }

        if self.ledger.backend == LedgerBackend::Memory && self.is_production() {
            return Err(anyhow::anyhow!(
                "The memory ledger backend loses job state on restart and is not allowed in production"
            ));
        }

        if self.dispatcher.max_receive_count == 0 {
            return Err(anyhow::anyhow!("QUEUE_MAX_RECEIVE_COUNT must be at least 1"));
        }

        if self.orchestrator.submission_max_attempts == 0 {
            return Err(anyhow::anyhow!("SUBMISSION_MAX_ATTEMPTS must be at least 1"));
        }

        Ok(())
    }

    /// Whether the asynchronous video moderation channel is configured.
    pub fn video_moderation_enabled(&self) -> bool {
        self.analysis.video_moderation_sns_topic_arn.is_some()
            && self.analysis.video_moderation_role_arn.is_some()
    }
}
