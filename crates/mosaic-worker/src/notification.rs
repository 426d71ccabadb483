//! Normalization of job-result queue payloads.
//!
//! Two shapes arrive on the job-result queue: direct JSON published by our
//! own transcoder or tooling ([`JobResultMessage`]), and Rekognition
//! completion notifications, either wrapped in an SNS envelope or delivered
//! raw. Both become a [`JobNotification`].

use mosaic_core::models::{JobKind, JobOutcome, JobResultMessage};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

const CONTENT_MODERATION_API: &str = "StartContentModeration";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Terminal outcome carried in the message itself.
    Outcome(JobOutcome),
    /// Moderation finished; labels must be fetched from the provider.
    ModerationSucceeded,
    /// Progress report, nothing to reconcile.
    NotTerminal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNotification {
    pub job_id: String,
    pub job_tag: Option<Uuid>,
    pub kind: Option<JobKind>,
    pub completion: Completion,
}

#[derive(Debug, thiserror::Error)]
#[error("Unrecognized job result payload: {0}")]
pub struct PayloadError(String);

/// Rekognition video job completion, as published to SNS.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RekognitionCompletion {
    job_id: String,
    status: String,
    #[serde(rename = "API")]
    api: Option<String>,
    job_tag: Option<String>,
    status_message: Option<String>,
}

pub fn parse_job_result(body: &str) -> Result<JobNotification, PayloadError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| PayloadError(format!("invalid JSON: {}", e)))?;
    let value = unwrap_sns(value)?;

    if value.get("JobId").is_some() {
        let completion: RekognitionCompletion =
            serde_json::from_value(value).map_err(|e| PayloadError(e.to_string()))?;
        return Ok(from_rekognition(completion));
    }

    let message: JobResultMessage =
        serde_json::from_value(value).map_err(|e| PayloadError(e.to_string()))?;
    Ok(JobNotification {
        job_tag: message.tagged_asset_id(),
        job_id: message.job_id,
        kind: message.kind,
        completion: Completion::Outcome(message.outcome),
    })
}

/// Strip an SNS `Notification` envelope, whose `Message` is itself JSON text.
fn unwrap_sns(value: Value) -> Result<Value, PayloadError> {
    if value.get("Type").and_then(Value::as_str) != Some("Notification") {
        return Ok(value);
    }
    let inner = value
        .get("Message")
        .and_then(Value::as_str)
        .ok_or_else(|| PayloadError("SNS envelope without Message".to_string()))?;
    serde_json::from_str(inner).map_err(|e| PayloadError(format!("invalid SNS Message: {}", e)))
}

fn from_rekognition(completion: RekognitionCompletion) -> JobNotification {
    let kind = match completion.api.as_deref() {
        Some(CONTENT_MODERATION_API) | None => Some(JobKind::VideoModeration),
        Some(_) => None,
    };
    let status = completion.status.to_uppercase();
    let outcome = match status.as_str() {
        "SUCCEEDED" => Completion::ModerationSucceeded,
        "FAILED" | "ERROR" => Completion::Outcome(JobOutcome::Failed {
            reason: completion
                .status_message
                .unwrap_or_else(|| format!("moderation job {}", status.to_lowercase())),
        }),
        _ => Completion::NotTerminal(status),
    };

    JobNotification {
        job_tag: completion
            .job_tag
            .as_deref()
            .and_then(|t| Uuid::parse_str(t).ok()),
        job_id: completion.job_id,
        kind,
        completion: outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sns_wrapped_rekognition_success() {
        let asset = Uuid::new_v4();
        let inner = json!({
            "JobId": "abc123",
            "Status": "SUCCEEDED",
            "API": "StartContentModeration",
            "JobTag": asset.to_string(),
            "Timestamp": 1700000000000u64,
            "Video": { "S3ObjectName": "media/o/a.mp4", "S3Bucket": "bucket" }
        });
        let body = json!({
            "Type": "Notification",
            "MessageId": "m-1",
            "TopicArn": "arn:aws:sns:us-east-1:123:moderation",
            "Message": inner.to_string()
        })
        .to_string();

        let parsed = parse_job_result(&body).unwrap();
        assert_eq!(parsed.job_id, "abc123");
        assert_eq!(parsed.job_tag, Some(asset));
        assert_eq!(parsed.kind, Some(JobKind::VideoModeration));
        assert_eq!(parsed.completion, Completion::ModerationSucceeded);
    }

    #[test]
    fn test_raw_rekognition_failure() {
        let body = json!({
            "JobId": "abc123",
            "Status": "FAILED",
            "API": "StartContentModeration",
            "StatusMessage": "Unsupported codec"
        })
        .to_string();

        let parsed = parse_job_result(&body).unwrap();
        assert_eq!(parsed.job_tag, None);
        assert_eq!(
            parsed.completion,
            Completion::Outcome(JobOutcome::Failed {
                reason: "Unsupported codec".to_string()
            })
        );
    }

    #[test]
    fn test_direct_payload() {
        let body = json!({
            "job_id": "tx-1",
            "kind": "video_transcode",
            "status": "succeeded"
        })
        .to_string();

        let parsed = parse_job_result(&body).unwrap();
        assert_eq!(parsed.kind, Some(JobKind::VideoTranscode));
        assert_eq!(
            parsed.completion,
            Completion::Outcome(JobOutcome::Succeeded { labels: vec![] })
        );
    }

    #[test]
    fn test_in_progress_is_not_terminal() {
        let body = json!({ "JobId": "abc", "Status": "IN_PROGRESS" }).to_string();
        assert_eq!(
            parse_job_result(&body).unwrap().completion,
            Completion::NotTerminal("IN_PROGRESS".to_string())
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse_job_result("not json").is_err());
        assert!(parse_job_result(r#"{"Type":"Notification"}"#).is_err());
        assert!(parse_job_result(r#"{"hello":"world"}"#).is_err());
    }
}
