//! AWS Rekognition implementation of the detection and moderation traits.
//!
//! Rekognition reads objects straight from the configured bucket, so only
//! storage keys cross this boundary.

use crate::error::{AnalysisError, AnalysisResult};
use crate::taxonomy::ModerationTaxonomy;
use crate::traits::{
    ImageModerator, ModerationLabel, ModerationVerdict, ObjectDetector, VideoModerationStatus,
    VideoModerator,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_rekognition::error::DisplayErrorContext;
use aws_sdk_rekognition::types::{Image, NotificationChannel, S3Object, Video, VideoJobStatus};
use aws_sdk_rekognition::Client as RekognitionClient;
use mosaic_core::AnalysisConfig;
use std::collections::BTreeSet;
use uuid::Uuid;

const CLIENT_TOKEN_PREFIX: &str = "mosaic-";

#[derive(Clone)]
pub struct RekognitionAnalyzer {
    client: RekognitionClient,
    config: AnalysisConfig,
    taxonomy: ModerationTaxonomy,
}

impl RekognitionAnalyzer {
    pub async fn new(config: AnalysisConfig) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.aws_region.clone()))
            .load()
            .await;
        Self::from_client(RekognitionClient::new(&sdk_config), config)
    }

    pub fn from_client(client: RekognitionClient, config: AnalysisConfig) -> Self {
        let taxonomy = ModerationTaxonomy::new(&config.moderation_taxonomy);
        Self {
            client,
            config,
            taxonomy,
        }
    }

    pub fn taxonomy(&self) -> &ModerationTaxonomy {
        &self.taxonomy
    }

    fn s3_object(&self, key: &str) -> S3Object {
        S3Object::builder()
            .bucket(&self.config.bucket)
            .name(key)
            .build()
    }

    fn notification_channel(&self) -> AnalysisResult<NotificationChannel> {
        let (Some(topic), Some(role)) = (
            self.config.video_moderation_sns_topic_arn.as_deref(),
            self.config.video_moderation_role_arn.as_deref(),
        ) else {
            return Err(AnalysisError::Configuration(
                "video moderation requires VIDEO_MODERATION_SNS_TOPIC_ARN and VIDEO_MODERATION_ROLE_ARN"
                    .to_string(),
            ));
        };

        NotificationChannel::builder()
            .sns_topic_arn(topic)
            .role_arn(role)
            .build()
            .map_err(|e| AnalysisError::Configuration(e.to_string()))
    }
}

/// Deterministic token so a retried submission returns the original job.
pub(crate) fn client_request_token(asset_id: Uuid) -> String {
    format!("{}{}", CLIENT_TOKEN_PREFIX, asset_id.simple())
}

fn provider_error<E>(context: &str, err: E) -> AnalysisError
where
    E: std::error::Error,
{
    AnalysisError::Provider(format!("{}: {}", context, DisplayErrorContext(err)))
}

#[async_trait]
impl ObjectDetector for RekognitionAnalyzer {
    #[tracing::instrument(skip(self))]
    async fn detect_objects(&self, key: &str) -> BTreeSet<String> {
        let image = Image::builder().s3_object(self.s3_object(key)).build();

        let response = match self
            .client
            .detect_labels()
            .image(image)
            .max_labels(self.config.detection_max_labels)
            .min_confidence(self.config.detection_min_confidence)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    error = %DisplayErrorContext(&e),
                    "Object detection failed, continuing without detected tags"
                );
                return BTreeSet::new();
            }
        };

        let tags: BTreeSet<String> = response
            .labels()
            .iter()
            .filter_map(|label| label.name())
            .map(|name| name.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();

        tracing::debug!(tag_count = tags.len(), "Object detection completed");
        tags
    }
}

#[async_trait]
impl ImageModerator for RekognitionAnalyzer {
    #[tracing::instrument(skip(self))]
    async fn moderate_image(&self, key: &str) -> AnalysisResult<ModerationVerdict> {
        let image = Image::builder().s3_object(self.s3_object(key)).build();

        let response = self
            .client
            .detect_moderation_labels()
            .image(image)
            .min_confidence(self.config.moderation_min_confidence)
            .send()
            .await
            .map_err(|e| provider_error("DetectModerationLabels failed", e))?;

        let labels: Vec<ModerationLabel> = response
            .moderation_labels()
            .iter()
            .filter_map(|label| {
                let name = label.name()?;
                Some(ModerationLabel {
                    name: name.to_string(),
                    parent_name: label
                        .parent_name()
                        .filter(|p| !p.is_empty())
                        .map(str::to_string),
                    confidence: label.confidence().unwrap_or(0.0),
                })
            })
            .collect();

        let flagged = self.taxonomy.is_flagged(&labels);
        tracing::info!(
            flagged = flagged,
            label_count = labels.len(),
            "Image moderation completed"
        );

        Ok(ModerationVerdict { flagged, labels })
    }
}

#[async_trait]
impl VideoModerator for RekognitionAnalyzer {
    #[tracing::instrument(skip(self), fields(asset_id = %asset_id))]
    async fn submit_video_moderation(&self, asset_id: Uuid, key: &str) -> AnalysisResult<String> {
        let channel = self.notification_channel()?;
        let video = Video::builder().s3_object(self.s3_object(key)).build();

        let response = self
            .client
            .start_content_moderation()
            .video(video)
            .min_confidence(self.config.moderation_min_confidence)
            .client_request_token(client_request_token(asset_id))
            .job_tag(asset_id.to_string())
            .notification_channel(channel)
            .send()
            .await
            .map_err(|e| provider_error("StartContentModeration failed", e))?;

        let job_id = response
            .job_id()
            .ok_or_else(|| AnalysisError::Provider("No job ID returned".to_string()))?
            .to_string();

        tracing::info!(job_id = %job_id, "Video moderation job submitted");
        Ok(job_id)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_video_moderation_labels(
        &self,
        job_id: &str,
    ) -> AnalysisResult<VideoModerationStatus> {
        let mut names = BTreeSet::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .client
                .get_content_moderation()
                .job_id(job_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| provider_error("GetContentModeration failed", e))?;

            match response.job_status() {
                Some(VideoJobStatus::Succeeded) => {}
                Some(VideoJobStatus::Failed) => {
                    let reason = response
                        .status_message()
                        .unwrap_or("Moderation job failed")
                        .to_string();
                    return Ok(VideoModerationStatus::Failed(reason));
                }
                Some(VideoJobStatus::InProgress) => return Ok(VideoModerationStatus::InProgress),
                other => {
                    return Err(AnalysisError::Provider(format!(
                        "Unexpected moderation job status: {:?}",
                        other
                    )));
                }
            }

            for detection in response.moderation_labels() {
                let Some(label) = detection.moderation_label() else {
                    continue;
                };
                if let Some(name) = label.name() {
                    names.insert(name.to_string());
                }
                if let Some(parent) = label.parent_name().filter(|p| !p.is_empty()) {
                    names.insert(parent.to_string());
                }
            }

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        tracing::info!(label_count = names.len(), "Video moderation labels fetched");
        Ok(VideoModerationStatus::Succeeded(names.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            aws_region: "us-east-1".to_string(),
            bucket: "media".to_string(),
            moderation_min_confidence: 50.0,
            detection_min_confidence: 70.0,
            detection_max_labels: 20,
            moderation_taxonomy: vec!["Violence".to_string()],
            video_moderation_sns_topic_arn: None,
            video_moderation_role_arn: None,
        }
    }

    fn analyzer(config: AnalysisConfig) -> RekognitionAnalyzer {
        let sdk_config = aws_sdk_rekognition::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1"))
            .build();
        RekognitionAnalyzer::from_client(RekognitionClient::from_conf(sdk_config), config)
    }

    #[test]
    fn test_client_request_token_is_deterministic_and_valid() {
        let id = Uuid::new_v4();
        let token = client_request_token(id);
        assert_eq!(token, client_request_token(id));
        assert!(token.len() <= 64);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn test_submit_without_channel_is_configuration_error() {
        let analyzer = analyzer(config());
        let err = analyzer
            .submit_video_moderation(Uuid::new_v4(), "media/a/clip.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Configuration(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_channel_built_when_configured() {
        let mut config = config();
        config.video_moderation_sns_topic_arn =
            Some("arn:aws:sns:us-east-1:123456789012:moderation".to_string());
        config.video_moderation_role_arn =
            Some("arn:aws:iam::123456789012:role/rekognition".to_string());
        let channel = analyzer(config).notification_channel().unwrap();
        assert_eq!(
            channel.sns_topic_arn(),
            "arn:aws:sns:us-east-1:123456789012:moderation"
        );
    }

    #[test]
    fn test_taxonomy_comes_from_config() {
        let analyzer = analyzer(config());
        assert!(analyzer.taxonomy().matches("violence"));
        assert!(!analyzer.taxonomy().matches("suggestive"));
    }
}
