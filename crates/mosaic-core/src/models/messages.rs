//! Queue message payloads.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{JobKind, JobOutcome};

/// Body of an "upload ready" queue message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReadyMessage {
    pub asset_id: Uuid,
    pub storage_key: String,
    pub owner_id: Uuid,
    #[serde(default)]
    pub album_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Normalized external job completion.
///
/// `job_tag` carries the asset id when the provider echoes it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResultMessage {
    pub job_id: String,
    #[serde(default)]
    pub job_tag: Option<String>,
    #[serde(default)]
    pub kind: Option<JobKind>,
    /// Flattened: `status` plus `labels` or `reason` sit next to `job_id`.
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

impl JobResultMessage {
    pub fn tagged_asset_id(&self) -> Option<Uuid> {
        self.job_tag.as_deref().and_then(|t| Uuid::parse_str(t).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_job_result_payload() {
        let tag = Uuid::new_v4();
        let message: JobResultMessage = serde_json::from_value(json!({
            "job_id": "job-1",
            "job_tag": tag.to_string(),
            "kind": "video_moderation",
            "status": "succeeded",
            "labels": ["Violence"]
        }))
        .unwrap();
        assert_eq!(message.tagged_asset_id(), Some(tag));
        assert_eq!(message.kind, Some(JobKind::VideoModeration));
        assert_eq!(
            message.outcome,
            JobOutcome::Succeeded {
                labels: vec!["Violence".to_string()]
            }
        );
    }

    #[test]
    fn test_failed_payload_without_tag() {
        let message: JobResultMessage = serde_json::from_value(json!({
            "job_id": "tx-1",
            "status": "failed",
            "reason": "codec"
        }))
        .unwrap();
        assert_eq!(message.tagged_asset_id(), None);
        assert_eq!(
            message.outcome,
            JobOutcome::Failed {
                reason: "codec".to_string()
            }
        );
    }
}
